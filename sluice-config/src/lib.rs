//! Configuration for the Sluice CLI and server.
//!
//! The configuration lives in a folder that contains a `config.yml` file. Every section of the
//! file is optional and falls back to defaults. Values can be overridden from the command line or
//! the environment through [`OverridableConfig`].

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
