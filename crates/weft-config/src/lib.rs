//! Configuration shared by the `weft` LSP client crates.
//!
//! [`Config`] describes how the client talks to a language server: whether the
//! server handles several workspace folders over one connection, how URIs are
//! mapped between the host and server namespaces, the default document
//! selector, the options forwarded during `initialize`, and telemetry
//! settings. Values deserialise from TOML and are validated eagerly so a bad
//! mapping fails at load time rather than on the first request.

mod defaults;
mod logging;
mod workspace;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use defaults::{
    DEFAULT_LOG_FILTER, default_log_filter, default_log_filter_string, default_log_format,
    default_workspace_folders,
};
pub use logging::{LogFormat, LogFormatParseError, LoggingConfig};
pub use workspace::{
    DocumentFilter, DocumentSelector, SelectorEntry, UriMapping, WorkspaceFoldersMode,
};

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Asserted multi-root support of the language server.
    #[serde(default = "default_workspace_folders")]
    pub workspace_folders: WorkspaceFoldersMode,
    /// Selector inherited by features that do not declare their own.
    #[serde(default)]
    pub document_selector: DocumentSelector,
    /// Prefix rewrites between host and server URIs, tried in order.
    #[serde(default)]
    pub uri_mappings: Vec<UriMapping>,
    /// Suffix appended to every progress reporter title.
    #[serde(default)]
    pub progress_suffix: String,
    /// Value forwarded verbatim as `initializationOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
    /// Telemetry settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and the validation
    /// errors described on [`Config::validate`].
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|source| ConfigError::Parse {
            path: None,
            source: Box::new(source),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, otherwise
    /// the same errors as [`Config::from_toml_str`] annotated with the path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|error| error.with_path(path))
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyLogFilter`] when the filter is blank and
    /// [`ConfigError::InvalidMapping`] when either side of a URI mapping
    /// cannot act as a prefix (for example `mailto:` style URLs).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::EmptyLogFilter);
        }
        for mapping in &self.uri_mappings {
            for prefix in [&mapping.client, &mapping.server] {
                if prefix.cannot_be_a_base() {
                    return Err(ConfigError::InvalidMapping {
                        prefix: prefix.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns `true` when one shared connection serves every root.
    #[must_use]
    pub fn is_multi_root(&self) -> bool {
        self.workspace_folders.is_multi_root()
    }
}

/// Errors raised while loading or validating [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{}': {source}", path.display())]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML text was malformed or did not match the schema.
    #[error("invalid configuration{}: {source}", describe_path(path.as_deref()))]
    Parse {
        /// File the text came from, when known.
        path: Option<PathBuf>,
        /// Underlying parser error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// `logging.filter` was blank.
    #[error("logging.filter must not be empty")]
    EmptyLogFilter,
    /// A URI mapping prefix cannot be used as a base.
    #[error("uri mapping prefix '{prefix}' cannot be used as a base URL")]
    InvalidMapping {
        /// Offending prefix.
        prefix: String,
    },
}

impl ConfigError {
    fn with_path(self, file: &Path) -> Self {
        match self {
            Self::Parse { path: None, source } => Self::Parse {
                path: Some(file.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}

fn describe_path(path: Option<&Path>) -> String {
    path.map(|path| format!(" in '{}'", path.display()))
        .unwrap_or_default()
}
