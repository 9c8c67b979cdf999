use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::ArgMatches;
use sluice_config::{Config, MinimalConfig, OverridableConfig};

use crate::{cliapp, healthcheck, setup};

/// The config folder used when `--config` is not passed.
const DEFAULT_CONFIG_DIR: &str = ".sluice";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = cliapp::make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(DEFAULT_CONFIG_DIR), PathBuf::as_path);

    // Commands that do not need to load the config:
    if let Some(matches) = matches.subcommand_matches("config") {
        if matches.subcommand_matches("init").is_some() {
            return init_config(config_path);
        }
    }

    // Commands that need a loaded config:
    let mut config = Config::from_path(config_path)?;
    // override file config with environment variables
    let env_config = extract_config_env_vars();
    config.apply_override(env_config)?;

    sluice_log::init(config.logging());

    if let Some(matches) = matches.subcommand_matches("config") {
        manage_config(&config, matches)
    } else if let Some(matches) = matches.subcommand_matches("healthcheck") {
        healthcheck::healthcheck(&config, matches)
    } else if let Some(matches) = matches.subcommand_matches("run") {
        // override config with run command args
        let arg_config = extract_config_args(matches);
        config.apply_override(arg_config)?;
        run(config)
    } else {
        unreachable!();
    }
}

/// Extract config arguments from a parsed command line arguments object
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        host: matches.get_one("host").cloned(),
        port: matches.get_one("port").cloned(),
        interval: matches.get_one("interval").cloned(),
        max_metrics: matches.get_one("max_metrics").cloned(),
        endpoint: matches.get_one("endpoint").cloned(),
        core_name: matches.get_one("core_name").cloned(),
    }
}

/// Extract config arguments from environment variables
pub fn extract_config_env_vars() -> OverridableConfig {
    OverridableConfig {
        host: env::var("SLUICE_HOST").ok(),
        port: env::var("SLUICE_PORT").ok(),
        interval: env::var("SLUICE_INTERVAL").ok(),
        max_metrics: env::var("SLUICE_MAX_METRICS").ok(),
        endpoint: env::var("SLUICE_ENDPOINT").ok(),
        core_name: env::var("SLUICE_CORE_NAME").ok(),
    }
}

#[allow(clippy::print_stdout)]
pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(matches) = matches.subcommand_matches("show") {
        match matches.get_one::<String>("format").map(String::as_str) {
            Some("debug") => println!("{config:#?}"),
            _ => print!("{}", config.to_yaml_string()?),
        }
        Ok(())
    } else {
        unreachable!();
    }
}

#[allow(clippy::print_stdout)]
pub fn init_config(config_path: &Path) -> Result<()> {
    let file = config_path.join("config.yml");
    if file.exists() {
        bail!(
            "there is already a config in {}, remove it first to start over",
            config_path.display()
        );
    }

    MinimalConfig::default().save_in_folder(config_path)?;
    println!("Generated new config in {}", file.display());
    println!("Run `sluice run -c {}` to start.", config_path.display());

    Ok(())
}

pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;
    sluice_server::run(config)?;
    Ok(())
}
