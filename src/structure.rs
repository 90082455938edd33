//! SDMX-ML 2.1 structure messages.
//!
//! Only the parts needed to build a [`DataflowSchema`] are read: dataflow
//! headers, the dimension/attribute/measure lists of each data structure, and
//! which codelists contain the `_T` total code.

use crate::models::{Attribute, DataflowInfo, DataflowSchema, Dimension, TOTAL_CODE};
use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct FlowHeader {
    info: DataflowInfo,
    structure_ref: Option<String>,
}

#[derive(Debug, Default)]
struct Dsd {
    id: String,
    dimensions: Vec<Dimension>,
    time_dimension: Option<String>,
    primary_measure: Option<String>,
    attributes: Vec<Attribute>,
}

#[derive(Debug)]
enum Component {
    Dimension(Dimension),
    Attribute(Attribute),
}

impl Component {
    fn set_codelist(&mut self, id: String) {
        match self {
            Component::Dimension(d) => d.codelist_ref = Some(id),
            Component::Attribute(a) => a.codelist_ref = Some(id),
        }
    }
}

#[derive(Debug, Default)]
struct StructureMessage {
    flows: Vec<FlowHeader>,
    structures: Vec<Dsd>,
    /// Codelists that contain a `_T` code.
    total_codelists: HashSet<String>,
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.context("malformed xml attribute")?;
        if a.key.local_name().as_ref() == name {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(e: &BytesStart<'_>, name: &[u8]) -> Result<String> {
    attr(e, name)?.ok_or_else(|| {
        anyhow!(
            "<{}> without {} attribute",
            String::from_utf8_lossy(e.local_name().as_ref()),
            String::from_utf8_lossy(name)
        )
    })
}

fn parse_message(xml: &str) -> Result<StructureMessage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut msg = StructureMessage::default();
    let mut flow: Option<FlowHeader> = None;
    let mut in_flow_structure = false;
    let mut capture_name = false;
    let mut dsd: Option<Dsd> = None;
    let mut component: Option<Component> = None;
    let mut in_enumeration = false;
    let mut codelist: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("xml error at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    // constraint attachments reference a dataflow by a child <Ref>, without an id
                    b"Dataflow" if flow.is_none() => {
                        let Some(id) = attr(e, b"id")? else {
                            continue;
                        };
                        let header = FlowHeader {
                            info: DataflowInfo {
                                id,
                                agency: attr(e, b"agencyID")?.unwrap_or_default(),
                                version: attr(e, b"version")?.unwrap_or_default(),
                                name: String::new(),
                            },
                            structure_ref: None,
                        };
                        if is_empty {
                            msg.flows.push(header);
                        } else {
                            flow = Some(header);
                        }
                    }
                    b"Name" if flow.is_some() && !in_flow_structure => {
                        let lang = attr(e, b"lang")?;
                        let unnamed = flow.as_ref().is_some_and(|f| f.info.name.is_empty());
                        if !is_empty && unnamed && lang.as_deref().is_none_or(|l| l == "en") {
                            capture_name = true;
                        }
                    }
                    b"Structure" if flow.is_some() => in_flow_structure = !is_empty,
                    b"DataStructure" => {
                        dsd = Some(Dsd {
                            id: required_attr(e, b"id")?,
                            ..Dsd::default()
                        });
                    }
                    b"Dimension" if dsd.is_some() => {
                        let name = required_attr(e, b"id")?;
                        let position = match attr(e, b"position")? {
                            Some(p) => p
                                .parse::<usize>()
                                .with_context(|| format!("bad position {p:?} on {name}"))?,
                            None => dsd.as_ref().map(|d| d.dimensions.len() + 1).unwrap_or(1),
                        };
                        let c = Component::Dimension(Dimension::new(name, position));
                        if is_empty {
                            finish_component(dsd.as_mut(), c);
                        } else {
                            component = Some(c);
                        }
                    }
                    b"TimeDimension" => {
                        if let Some(d) = dsd.as_mut() {
                            d.time_dimension = Some(required_attr(e, b"id")?);
                        }
                    }
                    b"PrimaryMeasure" => {
                        if let Some(d) = dsd.as_mut() {
                            d.primary_measure = Some(required_attr(e, b"id")?);
                        }
                    }
                    b"Attribute" if dsd.is_some() => {
                        let c = Component::Attribute(Attribute {
                            name: required_attr(e, b"id")?,
                            codelist_ref: None,
                        });
                        if is_empty {
                            finish_component(dsd.as_mut(), c);
                        } else {
                            component = Some(c);
                        }
                    }
                    b"Enumeration" => in_enumeration = !is_empty,
                    b"Ref" => {
                        if in_enumeration {
                            if let Some(c) = component.as_mut() {
                                c.set_codelist(required_attr(e, b"id")?);
                            }
                        } else if in_flow_structure {
                            if let Some(f) = flow.as_mut() {
                                f.structure_ref = attr(e, b"id")?;
                            }
                        }
                    }
                    b"Codelist" if !is_empty => codelist = Some(required_attr(e, b"id")?),
                    b"Code" => {
                        if let Some(cl) = &codelist {
                            if attr(e, b"id")?.as_deref() == Some(TOTAL_CODE) {
                                msg.total_codelists.insert(cl.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) if capture_name => {
                if let Some(f) = flow.as_mut() {
                    f.info.name.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Name" => capture_name = false,
                b"Structure" => in_flow_structure = false,
                b"Dataflow" => {
                    if let Some(f) = flow.take() {
                        msg.flows.push(f);
                    }
                }
                b"Dimension" | b"Attribute" => {
                    if let Some(c) = component.take() {
                        finish_component(dsd.as_mut(), c);
                    }
                }
                b"Enumeration" => in_enumeration = false,
                b"DataStructure" => {
                    if let Some(d) = dsd.take() {
                        msg.structures.push(d);
                    }
                }
                b"Codelist" => codelist = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(msg)
}

fn finish_component(dsd: Option<&mut Dsd>, c: Component) {
    if let Some(d) = dsd {
        match c {
            Component::Dimension(dim) => d.dimensions.push(dim),
            Component::Attribute(a) => d.attributes.push(a),
        }
    }
}

/// Build the schema of `dataflow_id` from a dataflow query made with
/// `references=all` (or any message that carries the data structure).
///
/// The result is not yet validated.
pub fn parse_dataflow_schema(xml: &str, dataflow_id: &str) -> Result<DataflowSchema> {
    let msg = parse_message(xml)?;
    let header = msg.flows.iter().find(|f| f.info.id == dataflow_id);
    let wanted = header
        .and_then(|h| h.structure_ref.clone())
        .unwrap_or_else(|| dataflow_id.to_string());
    let dsd = msg
        .structures
        .iter()
        .find(|d| d.id == wanted)
        .or_else(|| msg.structures.first())
        .ok_or_else(|| anyhow!("no data structure for dataflow {dataflow_id} in message"))?;

    let dimensions = dsd
        .dimensions
        .iter()
        .cloned()
        .map(|mut d| {
            d.has_total = d
                .codelist_ref
                .as_ref()
                .is_some_and(|cl| msg.total_codelists.contains(cl));
            d
        })
        .collect();

    let mut schema = DataflowSchema::new(dataflow_id, dimensions);
    if let Some(t) = &dsd.time_dimension {
        schema.time_dimension = t.clone();
    }
    if let Some(m) = &dsd.primary_measure {
        schema.primary_measure = m.clone();
    }
    schema.attributes = dsd.attributes.clone();
    if let Some(h) = header {
        schema.agency = Some(h.info.agency.clone()).filter(|s| !s.is_empty());
        schema.version = Some(h.info.version.clone()).filter(|s| !s.is_empty());
        schema.name = Some(h.info.name.clone()).filter(|s| !s.is_empty());
    }
    Ok(schema)
}

/// Parse the dataflow list returned by `{base}/dataflow/{agency}`.
pub fn parse_dataflow_list(xml: &str) -> Result<Vec<DataflowInfo>> {
    let msg = parse_message(xml)?;
    Ok(msg.flows.into_iter().map(|f| f.info).collect())
}
