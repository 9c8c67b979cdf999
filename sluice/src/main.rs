//! The Sluice binary.
//!
//! Sluice receives metric submissions from processes on the same device, buffers them per
//! namespace and forwards them in batches to a remote metrics ingestion service.
//!
//! # Usage
//!
//! ```text
//! sluice config init
//! sluice run --interval 10
//! sluice healthcheck --mode ready
//! ```
//!
//! All commands read `config.yml` from the folder passed with `--config`, defaulting to
//! `.sluice` in the working directory. Most settings can be overridden with `SLUICE_*` environment
//! variables and command line flags of the `run` command.

mod cli;
mod cliapp;
mod healthcheck;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            sluice_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
