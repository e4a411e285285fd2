//! Logging output selection for the entrypoint binary.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    Display,
    EnumString,
    ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Single-line human-readable output, suitable for `docker logs`.
    #[default]
    Compact,
    /// Structured JSON for ingestion by a logging stack.
    Json,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::LogFormat;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("compact").unwrap(), LogFormat::Compact);
    }

    #[test]
    fn defaults_to_compact() {
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}
