//! Logging facade for Sluice.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files.
//!
//! ```
//! use sluice_log::LogConfig;
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! sluice_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! The basic use is through the five logging macros: [`error!`], [`warn!`], [`info!`],
//! [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages and
//! `trace!` the lowest. Each of these macros accept format strings similarly to [`println!`], as
//! well as structured fields.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior, such as metrics that could not be delivered.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log errors with all their causes, use the [`LogError`] wrapper:
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use sluice_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! sluice_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     sluice_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
