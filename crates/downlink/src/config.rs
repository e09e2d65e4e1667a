// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! log_level = "debug"
//!
//! [framing]
//! transport_header_len = 28
//! transport_trailer_len = 160
//! payload_size = 1087
//!
//! [policy]
//! missing_rate_tolerance = 50.0
//! max_request_ranges = 5
//! sequence_ceiling = 300000
//!
//! [paths]
//! partial_dir = "./tmp"
//! ```

use crate::framer::FrameLayout;
use crate::gap::GapPolicy;
use crate::index::LengthPolicy;
use crate::packet::{
    MAX_DATA_SIZE, QUALITY_FLAG_OFFSET, TRANSPORT_HEADER_LEN, TRANSPORT_TRAILER_LEN,
};
use crate::request::RetransmissionPlanner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub framing: FramingConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            framing: FramingConfig::default(),
            policy: PolicyConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.framing.payload_size == 0 {
            return Err(ConfigError::Invalid("payload_size must be > 0".into()));
        }
        if self.framing.payload_size > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "payload_size must be <= {} to fit a partial record entry",
                u16::MAX
            )));
        }
        if self.framing.transport_header_len <= QUALITY_FLAG_OFFSET {
            return Err(ConfigError::Invalid(format!(
                "transport_header_len must be > {} to hold the quality flag",
                QUALITY_FLAG_OFFSET
            )));
        }

        let tolerance = self.policy.missing_rate_tolerance;
        if !(tolerance > 0.0 && tolerance <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "missing_rate_tolerance must be in (0, 100], got {}",
                tolerance
            )));
        }
        if self.policy.max_request_ranges == 0 {
            return Err(ConfigError::Invalid(
                "max_request_ranges must be >= 1".into(),
            ));
        }
        if self.policy.sequence_ceiling == 0 {
            return Err(ConfigError::Invalid("sequence_ceiling must be >= 1".into()));
        }

        Ok(())
    }

    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout {
            transport_header_len: self.framing.transport_header_len,
            transport_trailer_len: self.framing.transport_trailer_len,
            payload_size: self.framing.payload_size,
        }
    }

    pub fn gap_policy(&self) -> GapPolicy {
        GapPolicy {
            payload_size: self.framing.payload_size,
            sequence_ceiling: self.policy.sequence_ceiling,
        }
    }

    pub fn length_policy(&self) -> LengthPolicy {
        LengthPolicy {
            max_declared_length: self.policy.max_declared_length,
        }
    }

    pub fn planner(&self) -> RetransmissionPlanner {
        RetransmissionPlanner::new(
            self.policy.missing_rate_tolerance,
            self.policy.max_request_ranges,
        )
    }

    /// Root all relative paths under `base`.
    pub fn with_base_dir<P: AsRef<Path>>(mut self, base: P) -> Self {
        let base = base.as_ref();
        let paths = &mut self.paths;
        for dir in [
            &mut paths.partial_dir,
            &mut paths.output_dir,
            &mut paths.report_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }
}

/// Receiver framing sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    #[serde(default = "default_transport_header_len")]
    pub transport_header_len: usize,

    #[serde(default = "default_transport_trailer_len")]
    pub transport_trailer_len: usize,

    /// Payload bytes per packet.
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_transport_header_len() -> usize {
    TRANSPORT_HEADER_LEN
}

fn default_transport_trailer_len() -> usize {
    TRANSPORT_TRAILER_LEN
}

fn default_payload_size() -> usize {
    MAX_DATA_SIZE
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            transport_header_len: TRANSPORT_HEADER_LEN,
            transport_trailer_len: TRANSPORT_TRAILER_LEN,
            payload_size: MAX_DATA_SIZE,
        }
    }
}

/// Gap and retransmission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Missing rate (percent) at or above which the whole file is requested.
    #[serde(default = "default_tolerance")]
    pub missing_rate_tolerance: f64,

    /// Maximum ranges per retransmission request.
    #[serde(default = "default_max_request_ranges")]
    pub max_request_ranges: usize,

    /// Sequences above this are treated as corrupted.
    #[serde(default = "default_sequence_ceiling")]
    pub sequence_ceiling: u32,

    /// Working length cap when no declared length has a majority (bytes).
    #[serde(default = "default_max_declared_length")]
    pub max_declared_length: u32,
}

fn default_tolerance() -> f64 {
    50.0
}

fn default_max_request_ranges() -> usize {
    5
}

fn default_sequence_ceiling() -> u32 {
    300_000
}

fn default_max_declared_length() -> u32 {
    64 * 1024 * 1024
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            missing_rate_tolerance: default_tolerance(),
            max_request_ranges: default_max_request_ranges(),
            sequence_ceiling: default_sequence_ceiling(),
            max_declared_length: default_max_declared_length(),
        }
    }
}

/// Working directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Partial-file records.
    #[serde(default = "default_partial_dir")]
    pub partial_dir: PathBuf,

    /// Materialized mission files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// CSV reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_partial_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./Mission_data")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("./report")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            partial_dir: default_partial_dir(),
            output_dir: default_output_dir(),
            report_dir: default_report_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = PipelineConfig::from_toml("").expect("parse");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.frame_layout(), FrameLayout::default());
        assert_eq!(config.gap_policy(), GapPolicy::default());
        assert_eq!(config.planner(), RetransmissionPlanner::default());
        assert_eq!(config.paths.partial_dir, PathBuf::from("./tmp"));
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml(
            r#"
log_level = "debug"

[framing]
payload_size = 512

[policy]
missing_rate_tolerance = 30.0
"#,
        )
        .expect("parse");

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.framing.payload_size, 512);
        assert_eq!(config.framing.transport_trailer_len, TRANSPORT_TRAILER_LEN);
        assert_eq!(config.policy.missing_rate_tolerance, 30.0);
        assert_eq!(config.policy.max_request_ranges, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for toml in [
            "[framing]\npayload_size = 0",
            "[framing]\npayload_size = 65536",
            "[framing]\ntransport_header_len = 1",
            "[policy]\nmissing_rate_tolerance = 0.0",
            "[policy]\nmissing_rate_tolerance = 150.0",
            "[policy]\nmax_request_ranges = 0",
            "[policy]\nsequence_ceiling = 0",
        ] {
            assert!(
                matches!(PipelineConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "accepted {:?}",
                toml
            );
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[policy\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_from_file_and_base_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("downlink.toml");
        std::fs::write(&path, "[paths]\nreport_dir = \"/var/reports\"\n").expect("write");

        let config = PipelineConfig::from_file(&path)
            .expect("load")
            .with_base_dir(dir.path());
        assert_eq!(config.paths.partial_dir, dir.path().join("./tmp"));
        assert_eq!(config.paths.report_dir, PathBuf::from("/var/reports"));
    }
}
