use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, format_err};
use clap::ArgMatches;
use reqwest::blocking::Client;
use sluice_config::Config;

#[allow(clippy::print_stdout)]
pub fn healthcheck(config: &Config, matches: &ArgMatches) -> Result<()> {
    let mode = matches
        .get_one::<String>("mode")
        .expect("`mode` has a default");

    let timeout = matches
        .get_one::<u64>("timeout")
        .expect("`timeout` has a default");

    let addr = matches
        .get_one::<SocketAddr>("addr")
        .copied()
        .unwrap_or(config.listen_addr());

    let client = Client::builder()
        .timeout(Some(Duration::from_secs(*timeout)))
        .build()
        .unwrap_or_default();

    let response = client
        .get(format!("http://{addr}/api/relay/healthcheck/{mode}/"))
        .send();

    match response {
        Ok(response) => {
            if response.status().is_success() {
                if matches.get_flag("verbose") {
                    println!("sluice at {addr} is healthy ({mode})");
                }
                Ok(())
            } else {
                sluice_log::error!("Sluice is unhealthy. Status code: {}", response.status());
                Err(format_err!(
                    "Sluice is unhealthy. Status code: {}",
                    response.status()
                ))
            }
        }
        Err(err) => {
            sluice_log::error!("Sluice is unhealthy. Error: {err}");
            Err(err.into())
        }
    }
}
