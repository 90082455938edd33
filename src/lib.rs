//! unicef_sdmx
//!
//! A Rust client core for the UNICEF SDMX data warehouse. It turns an
//! indicator code into a tidy table of observations without the caller having
//! to know which dataflow carries the indicator or how that dataflow's series
//! key is laid out.
//!
//! ### Features
//! - Resolve an indicator to an ordered list of candidate dataflows
//!   (metadata, pattern overrides, prefix table, then `GLOBAL_DATAFLOW`)
//! - Build positional series keys from each dataflow's own dimension order,
//!   pinning disaggregations to totals (`_T`) only where they are supported
//! - Query candidates in order until one returns rows
//! - Normalize the CSV answer into [`ObservationRow`]s with decimal-year periods
//! - Cache dataflow schemas loaded from metadata or from the API's structure endpoint
//!
//! ### Example
//! ```no_run
//! use unicef_sdmx::{Client, FetchRequest};
//!
//! let client = Client::default();
//! let rows = client.fetch(
//!     &FetchRequest::new("CME_MRY0T4")
//!         .countries(["ALB"])
//!         .years(2019, 2020)
//!         .dropna(),
//! )?;
//! for r in &rows {
//!     println!("{} {} {:?}", r.iso3, r.period, r.value);
//! }
//! # Ok::<(), unicef_sdmx::Error>(())
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod key;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod postprocess;
pub mod resolver;
pub mod schema;
pub mod structure;
pub mod transport;

pub use api::{
    Attempt, AttemptResult, Client, ClientBuilder, FetchOutcome, FetchReport, FetchRequest,
};
pub use config::{ClientConfig, FallbackConfig, PatternOverride};
pub use error::{Error, Result, TransportErrorKind};
pub use metadata::{InMemoryStore, MetadataStore};
pub use models::{
    DataflowId, DataflowSchema, DateSpec, Dimension, GLOBAL_DATAFLOW, GroupKey, IndicatorCode,
    IndicatorMetadata, ObservationRow, QueryKey, Role, TOTAL_CODE, Tier,
};
pub use postprocess::PostProcess;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport};
