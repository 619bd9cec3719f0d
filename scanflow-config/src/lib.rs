//! Configuration loading for scanflow.
//!
//! Scanner settings come from `$SCANNER_CONFIG_PATH`, inline
//! `$SCANNER_CONFIG_JSON`, one of the default file candidates, or built-in
//! defaults, in that order. Files may be TOML or JSON.

#![allow(missing_docs)]

pub mod models;

pub use models::scanner::{
    CONFIG_JSON_ENV, CONFIG_PATH_ENV, ScannerConfig, ScannerConfigSource,
};
