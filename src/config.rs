//! Configuration types for Tapedeck

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cassette::{Headers, MatchPolicy};
use crate::filter::{Filter, FilterRule, DEFAULT_REPLACEMENT};
use crate::recording::RecordMode;
use crate::session::SessionOptions;
use crate::storage::validate_cassette_name;
use crate::{Result, TapedeckError};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cassette to play back from and record into
    pub cassette_name: String,
    /// Record mode
    #[serde(default)]
    pub mode: RecordMode,
    /// Whether live calls may be made
    #[serde(default = "default_true")]
    pub recording_enabled: bool,
    /// Directory cassettes are loaded from
    pub cassette_dir: PathBuf,
    /// Directory recordings are written to (defaults to `cassette_dir`)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Request matching
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Redaction applied before matching and persistence
    #[serde(default)]
    pub redaction: RedactionConfig,
    /// Headers merged into every request
    #[serde(default)]
    pub additional_headers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// Matching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Headers used to break ties between candidates
    #[serde(default)]
    pub headers_to_check: Vec<String>,
    /// Query parameters excluded from URL comparison
    #[serde(default)]
    pub parameters_to_ignore: Vec<String>,
    /// Compare URL paths only
    #[serde(default)]
    pub ignore_base_url: bool,
}

/// Redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Request headers to redact
    #[serde(default)]
    pub headers: Vec<String>,
    /// Query parameters to redact
    #[serde(default)]
    pub query_parameters: Vec<String>,
    /// Response headers to redact
    #[serde(default)]
    pub response_headers: Vec<String>,
    /// Value substituted for redacted fields
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            query_parameters: Vec::new(),
            response_headers: Vec::new(),
            replacement: default_replacement(),
        }
    }
}

impl RedactionConfig {
    /// Build the filter these rules describe
    #[must_use]
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::redacting(&self.headers, &self.query_parameters, &self.replacement);
        for name in &self.response_headers {
            filter = filter.response_header(name, FilterRule::Replace(self.replacement.clone()));
        }
        filter
    }
}

impl MatchingConfig {
    /// Build the matching policy
    #[must_use]
    pub fn to_policy(&self) -> MatchPolicy {
        MatchPolicy {
            headers_to_check: self.headers_to_check.iter().cloned().collect(),
            parameters_to_ignore: self.parameters_to_ignore.iter().cloned().collect(),
            ignore_base_url: self.ignore_base_url,
        }
    }
}

impl SessionConfig {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_cassette_name(&self.cassette_name)?;

        if self.mode == RecordMode::All && !self.recording_enabled {
            return Err(TapedeckError::ConflictingRecordMode);
        }

        Ok(())
    }

    /// Directory recordings are written to
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.cassette_dir)
    }

    /// Session options these settings describe
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let additional_headers: Headers = self
            .additional_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        SessionOptions {
            name: self.cassette_name.clone(),
            mode: self.mode,
            recording_enabled: self.recording_enabled,
            policy: self.matching.to_policy(),
            filter: self.redaction.to_filter(),
            additional_headers,
        }
    }
}
