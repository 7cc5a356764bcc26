//! Counts log records flowing through a log pipeline and exposes the counts,
//! labelled by configurable record fields, on a Prometheus scrape endpoint.
//!
//! ```no_run
//! # async fn run() -> Result<(), logexporter::Error> {
//! use std::time::Duration;
//! use logexporter::Exporter;
//!
//! let exporter = Exporter::default();
//! exporter.start("").await?;
//!
//! let id = exporter.create_instance("host=hostname,pod=pod_name", "mylogs")?;
//! exporter.record(id, vec![("hostname", "a"), ("pod_name", "p1"), ("level", "info")])?;
//!
//! exporter.stop(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub use error::Error;
pub use exporter::{Exporter, Instance, DEFAULT_LISTEN_ADDRESS, DEFAULT_VIEW_NAME};
pub use labels::{LabelMapping, LabelSpec};
pub use record::{BatchDecoder, Record, Rendered};
pub use stats::{Stats, TagKey, TagMap, TagValue, View, DEFAULT_NAMESPACE};

pub mod config;
mod error;
mod exporter;
mod labels;
mod record;
mod stats;
