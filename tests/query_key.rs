mod common;

use common::*;
use std::sync::Arc;
use unicef_sdmx::{
    DataflowSchema, Dimension, Error, FetchRequest, InMemoryStore, IndicatorMetadata,
};

#[test]
fn key_follows_schema_order_with_totals() {
    let client = client(Arc::new(MockTransport::new()), store());
    let key = client
        .build_key("CME_MRY0T4", "CME", None, false)
        .unwrap();
    assert_eq!(key.as_str(), ".CME_MRY0T4._T._T");
    assert_eq!(key.segments().len(), 4);
}

#[test]
fn same_indicator_gets_different_keys_in_different_dataflows() {
    let client = client(Arc::new(MockTransport::new()), store());
    let nutrition = client
        .build_key("NT_ANT_HAZ_NE2", "NUTRITION", None, false)
        .unwrap();
    let global = client
        .build_key("NT_ANT_HAZ_NE2", GLOBAL, None, false)
        .unwrap();
    assert_eq!(nutrition.as_str(), ".NT_ANT_HAZ_NE2._T._T._T._T");
    assert_eq!(global.as_str(), ".NT_ANT_HAZ_NE2._T");
}

const GLOBAL: &str = "GLOBAL_DATAFLOW";

#[test]
fn nofilter_leaves_disaggregations_open() {
    let client = client(Arc::new(MockTransport::new()), store());
    let key = client
        .build_key("NT_ANT_HAZ_NE2", "NUTRITION", None, true)
        .unwrap();
    assert_eq!(key.as_str(), ".NT_ANT_HAZ_NE2....");
    let female = client
        .build_key("NT_ANT_HAZ_NE2", "NUTRITION", Some("F"), true)
        .unwrap();
    assert_eq!(female.as_str(), ".NT_ANT_HAZ_NE2.F...");
}

#[test]
fn total_only_where_the_indicator_supports_it() {
    let schema = DataflowSchema::new(
        "EDUCATION",
        vec![
            Dimension::new("REF_AREA", 1),
            Dimension::new("INDICATOR", 2),
            Dimension::new("SEX", 3).with_total(),
            Dimension::new("EDUCATION_LEVEL", 4).with_total(),
        ],
    );
    let store = InMemoryStore::new()
        .with_schema(schema)
        .and_then(|s| {
            s.with_indicator(
                IndicatorMetadata::new("ED_ANAR_L02", &["EDUCATION"])
                    .with_totals(&["SEX"])
                    .with_disaggregations(&["EDUCATION_LEVEL"]),
            )
        })
        .unwrap();
    let client = client(Arc::new(MockTransport::new()), store);
    let key = client
        .build_key("ED_ANAR_L02", "EDUCATION", None, false)
        .unwrap();
    // EDUCATION_LEVEL has no total for this indicator, so it stays open
    assert_eq!(key.as_str(), ".ED_ANAR_L02._T.");
}

#[test]
fn unknown_dataflow_has_no_key() {
    let client = client(Arc::new(MockTransport::new()), store());
    assert!(matches!(
        client.build_key("CME_MRY0T4", "NOPE", None, false),
        Err(Error::SchemaNotFound(id)) if id == "NOPE"
    ));
}

#[test]
fn fetch_sends_the_schema_key_with_countries_and_dates() {
    let mock = Arc::new(MockTransport::new().on_data("CME", 200, ALB_CME_CSV));
    let client = client(mock.clone(), store());
    client
        .fetch(
            &FetchRequest::new("CME_MRY0T4")
                .countries(["alb", "usa"])
                .years(2019, 2020),
        )
        .unwrap();
    assert_eq!(
        mock.data_calls(),
        vec![
            "https://sdmx.data.unicef.org/ws/public/sdmxapi/rest/data/UNICEF,CME,1.0/ALB+USA.CME_MRY0T4._T._T\
             ?format=csv&labels=id&startPeriod=2019&endPeriod=2020"
                .to_string()
        ]
    );
}
