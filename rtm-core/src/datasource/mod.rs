mod client;

pub use client::{DataSourceError, DataSourceResult, TrackerClient};
