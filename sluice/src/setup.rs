use anyhow::{Context, Result, bail};
use sluice_config::Config;
use sluice_statsd::MetricsClientConfig;

/// Rejects configurations that would start a server unable to publish anything.
pub fn check_config(config: &Config) -> Result<()> {
    let endpoint = config.publish_endpoint();
    if !matches!(endpoint.scheme(), "http" | "https") {
        bail!(
            "unsupported scheme {:?} of the publish endpoint, expected http or https",
            endpoint.scheme()
        );
    }

    if let Some(upstream) = config.relay_upstream() {
        if !matches!(upstream.scheme(), "http" | "https") {
            bail!(
                "unsupported scheme {:?} of the status upstream, expected http or https",
                upstream.scheme()
            );
        }
    }

    if config.input_topic() == config.output_topic() {
        bail!(
            "input and output topic must differ, both are {:?}",
            config.input_topic()
        );
    }

    if config.publish_interval().is_zero() {
        sluice_log::warn!("publish interval is zero, every metric is shipped on its own");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        sluice_log::info!("launching sluice without config folder");
    } else {
        sluice_log::info!(
            "launching sluice from config folder {}",
            config.path().display()
        );
    }
    sluice_log::info!("  core name: {}", config.core_name());
    sluice_log::info!("  publish endpoint: {}", config.publish_endpoint());
    match config.publish_region() {
        Some(region) => sluice_log::info!("  publish region: {region}"),
        None => sluice_log::info!("  publish region: -"),
    };
    sluice_log::info!(
        "  publish interval: {}s",
        config.publish_interval().as_secs()
    );
    sluice_log::info!("  max metrics: {}", config.max_metrics_to_retain());
    sluice_log::info!("  input topic: {}", config.input_topic());
    sluice_log::info!("  output topic: {}", config.output_topic());
    sluice_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let addrs = config.statsd_addrs()?;
    if addrs.is_empty() {
        return Ok(());
    }

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag() {
        if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
            default_tags.insert(hostname_tag.to_owned(), hostname);
        }
    }

    sluice_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host: addrs.as_slice(),
        buffer_size: config.metrics_buffer_size(),
        default_tags,
    })
    .context("failed to initialize statsd")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_check_default_config() {
        assert!(check_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_check_rejects_same_topics() {
        let config = Config::from_json_value(json!({
            "topics": {"input": "metrics", "output": "metrics"}
        }))
        .unwrap();

        let error = check_config(&config).unwrap_err();
        assert_eq!(
            error.to_string(),
            r#"input and output topic must differ, both are "metrics""#
        );
    }

    #[test]
    fn test_check_rejects_scheme() {
        let config = Config::from_json_value(json!({
            "publish": {"endpoint": "ftp://example.com/"}
        }))
        .unwrap();

        assert!(check_config(&config).is_err());
    }

    #[test]
    fn test_init_metrics_disabled() {
        assert!(init_metrics(&Config::default()).is_ok());
    }
}
