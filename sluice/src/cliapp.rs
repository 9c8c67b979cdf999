//! This module implements the definition of the command line app.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Sluice buffers metrics of edge devices and forwards them in batches.";

pub fn make_app() -> Command {
    Command::new("sluice")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run sluice")
                .after_help(
                    "This runs sluice in the foreground until it's shut down. It will bind \
                     to the port and network interface configured in the config file.",
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .short('H')
                        .value_name("HOST")
                        .help("The host address to bind to."),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('P')
                        .value_name("PORT")
                        .help("The port to bind to."),
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Seconds between two flushes. Zero ships every metric right away."),
                )
                .arg(
                    Arg::new("max_metrics")
                        .long("max-metrics")
                        .value_name("COUNT")
                        .help("The number of buffered metrics before old metrics are replaced."),
                )
                .arg(
                    Arg::new("endpoint")
                        .long("endpoint")
                        .value_name("URL")
                        .help("The URL of the remote metrics ingestion service."),
                )
                .arg(
                    Arg::new("core_name")
                        .long("core-name")
                        .value_name("NAME")
                        .help("The value of the coreName dimension added to every metric."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the sluice config")
                .after_help(
                    "This command provides basic config management. It can be \
                     used primarily to initialize a new sluice config and to \
                     print out the current config.",
                )
                .subcommand_required(true)
                .subcommand(
                    Command::new("init")
                        .about("Initialize a new sluice config")
                        .after_help(
                            "This creates a minimal config file in the config folder. \
                             The command fails if a config already exists.",
                        ),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values \
                             which are not in the config file but filled in from \
                             defaults. The default output format is YAML but \
                             a debug format can also be specified which is useful \
                             to understand how sluice interprets the individual \
                             values.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(["debug", "yaml"])
                                .default_value("yaml")
                                .help("The output format"),
                        ),
                ),
        )
        .subcommand(
            Command::new("healthcheck")
                .about("Check the health of a running sluice instance")
                .after_help(
                    "This queries the health check endpoint of a running sluice \
                     and exits with a non-zero code if it is unhealthy.",
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .short('m')
                        .value_parser(["live", "ready"])
                        .default_value("ready")
                        .help("The kind of health check to run."),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("2")
                        .help("Seconds to wait for the response."),
                )
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .value_parser(value_parser!(SocketAddr))
                        .help("The address to check, defaults to the listen address of the config."),
                )
                .arg(
                    Arg::new("verbose")
                        .long("verbose")
                        .short('v')
                        .action(ArgAction::SetTrue)
                        .help("Print the result of the health check."),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_definition() {
        make_app().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let matches = make_app()
            .try_get_matches_from(["sluice", "-c", "/etc/sluice", "run", "--interval", "5"])
            .unwrap();

        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("/etc/sluice"))
        );
        let (name, run) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(run.get_one::<String>("interval").map(String::as_str), Some("5"));
        assert!(run.get_one::<String>("port").is_none());
    }

    #[test]
    fn test_rejects_unknown_health_mode() {
        let result = make_app().try_get_matches_from(["sluice", "healthcheck", "--mode", "dead"]);
        assert!(result.is_err());
    }
}
