//! Engine configuration module.
//!
//! Configuration is read from environment variables.
//!
//! # Environment Variables
//!
//! - `TICKET_DATA_DIRECTORY`: Directory holding the index and record files (default: `./data`)
//! - `TICKET_TREE_ORDER`: Node capacity of every index tree (default: derived from
//!   the entry width, see [`crate::storage::btree::default_order`])
//!
//! # Invariants
//!
//! - `tree_order`, when set, is at least [`MIN_ORDER`]

use std::path::PathBuf;

use crate::storage::btree::MIN_ORDER;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory where the `.dat` files live. Created on startup if missing.
    pub data_directory: PathBuf,
    /// Node capacity override for the index trees.
    ///
    /// An existing file must have been created with the same capacity.
    pub tree_order: Option<usize>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TICKET_TREE_ORDER` is set but is not an integer
    /// of at least [`MIN_ORDER`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            data_directory: Self::load_data_directory(lookup),
            tree_order: Self::load_tree_order(lookup)?,
        })
    }

    fn load_data_directory(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
        lookup("TICKET_DATA_DIRECTORY")
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from)
    }

    /// # Errors
    ///
    /// Returns an error if the value is set but not a valid order.
    fn load_tree_order(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<usize>, ConfigError> {
        let Some(value) = lookup("TICKET_TREE_ORDER") else {
            return Ok(None);
        };
        match value.parse::<usize>() {
            Ok(order) if order >= MIN_ORDER => Ok(Some(order)),
            _ => Err(ConfigError::InvalidValue {
                name: "TICKET_TREE_ORDER".to_string(),
                message: format!("'{value}' is not an integer of at least {MIN_ORDER}"),
            }),
        }
    }
}
