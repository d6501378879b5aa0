use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("missing required config value `{field}` (set it in rtm.toml or export {env})")]
    MissingValue {
        field: &'static str,
        env: &'static str,
    },
    #[error("invalid config value `{field}`: {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
