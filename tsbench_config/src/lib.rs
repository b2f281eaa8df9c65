//! Loading of the benchmark database config file
//!
//! The file is INI-like, see [`ini::IniFile`] for the accepted syntax. [`DbConfig`] pulls the
//! connection settings for one target out of its `[dbInfo]` section.

use std::path::PathBuf;

pub mod db;
pub mod ini;

pub use db::{DbConfig, TimeWindow};
pub use ini::IniFile;

/// Errors raised while reading or interpreting the config file
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("section not found: must start with section (line {line_number})")]
    MissingSectionHeader { line_number: usize },

    #[error("could not parse line {line_number}: {line}")]
    ParseLine { line_number: usize, line: String },

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("option [{section}:{option}] must not be empty")]
    EmptyOption { section: String, option: String },

    #[error("possible cycle while unfolding variables: max depth of {0} reached")]
    SubstitutionCycle(usize),

    #[error("option [{section}:{option}] has invalid value '{value}': {message}")]
    InvalidValue {
        section: String,
        option: String,
        value: String,
        message: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
