use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Longest allowed flush interval in seconds.
pub const MAX_PUBLISH_INTERVAL: u64 = 900;

/// Smallest allowed aggregate buffer capacity.
pub const MIN_MAX_METRICS: usize = 2000;

/// Topic that metric submissions are read from when none is configured.
pub const DEFAULT_INPUT_TOPIC: &str = "cloudwatch/metric/put";

/// Topic that status messages are written to when none is configured.
pub const DEFAULT_OUTPUT_TOPIC: &str = "cloudwatch/metric/put/status";

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Remove all non-user permissions for the newly created file
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the HTTP ingress should bind to (network interface).
    pub host: Option<String>,
    /// The port to bind for the HTTP ingress.
    pub port: Option<String>,
    /// Seconds between two timer-driven flushes.
    pub interval: Option<String>,
    /// The aggregate number of buffered metrics before records are replaced.
    pub max_metrics: Option<String>,
    /// The URL of the remote metrics ingestion service.
    pub endpoint: Option<String>,
    /// The source identity attached to every metric.
    pub core_name: Option<String>,
}

/// General service options.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Sluice {
    /// The host the HTTP ingress should bind to (network interface).
    pub host: IpAddr,
    /// The port to bind for the HTTP ingress.
    pub port: u16,
    /// Value of the `coreName` dimension added to every metric.
    ///
    /// Defaults to `$AWS_IOT_THING_NAME`, then to the hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_name: Option<String>,
}

impl Default for Sluice {
    fn default() -> Self {
        Sluice {
            host: default_host(),
            port: 3030,
            core_name: None,
        }
    }
}

/// Returns the default bind address for the HTTP ingress.
fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

/// Controls batching and delivery to the remote ingestion service.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Publish {
    /// Seconds between two timer-driven flushes. Zero flushes on every submission.
    ///
    /// Values that are not a non-negative integer fall back to the default.
    #[serde(deserialize_with = "deserialize_interval")]
    interval: u64,
    /// Aggregate number of buffered metrics across all namespaces before new metrics replace
    /// the oldest ones.
    max_metrics_to_retain: usize,
    /// Region of the remote service, forwarded as a request header.
    region: Option<String>,
    /// URL of the remote metrics ingestion service.
    endpoint: Url,
    /// Seconds before a remote call is abandoned and its batch requeued.
    request_timeout: u64,
}

/// Flush interval used when none or an invalid one is configured.
pub const DEFAULT_PUBLISH_INTERVAL: u64 = 20;

impl Default for Publish {
    fn default() -> Self {
        Publish {
            interval: DEFAULT_PUBLISH_INTERVAL,
            max_metrics_to_retain: 5000,
            region: None,
            endpoint: default_endpoint(),
            request_timeout: 10,
        }
    }
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Interval {
        Seconds(u64),
        Invalid(serde::de::IgnoredAny),
    }

    Ok(match Interval::deserialize(deserializer)? {
        Interval::Seconds(seconds) => seconds,
        Interval::Invalid(_) => {
            sluice_log::info!(
                "publish interval is invalid, setting it to {DEFAULT_PUBLISH_INTERVAL} seconds"
            );
            DEFAULT_PUBLISH_INTERVAL
        }
    })
}

fn default_endpoint() -> Url {
    "http://127.0.0.1:4566/".parse().unwrap()
}

/// Names of the local bus topics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Topics {
    /// Topic to read metric submissions from.
    input: String,
    /// Topic to write status messages to.
    output: String,
    /// When set, status messages are additionally posted to this URL.
    relay_upstream: Option<Url>,
}

impl Default for Topics {
    fn default() -> Self {
        Topics {
            input: DEFAULT_INPUT_TOPIC.to_owned(),
            output: DEFAULT_OUTPUT_TOPIC.to_owned(),
            relay_upstream: None,
        }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"sluice"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
    /// Size of the UDP buffer for statsd packets.
    buffer_size: Option<usize>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "sluice".into(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            buffer_size: None,
        }
    }
}

/// Controls various limits
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// The maximum payload size for a message published over HTTP.
    max_api_payload_size: usize,
    /// The number of messages a topic holds for slow subscribers before they lag behind.
    max_pending_messages: usize,
    /// The maximum number of seconds to wait for pending work after a shutdown signal.
    shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_api_payload_size: 256 * 1024,
            max_pending_messages: 1024,
            shutdown_timeout: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    sluice: Sluice,
    #[serde(default)]
    publish: Publish,
    #[serde(default)]
    topics: Topics,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    logging: sluice_log::LogConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

impl ConfigValues {
    /// Brings values into their permitted ranges.
    fn normalize(&mut self) {
        let publish = &mut self.publish;
        if publish.interval > MAX_PUBLISH_INTERVAL {
            sluice_log::info!(
                "publish interval can not be more than {MAX_PUBLISH_INTERVAL} seconds, setting it to max value"
            );
            publish.interval = MAX_PUBLISH_INTERVAL;
        }

        if publish.max_metrics_to_retain < MIN_MAX_METRICS {
            sluice_log::info!(
                "max metrics to retain can not be less than {MIN_MAX_METRICS}, setting it to least value"
            );
            publish.max_metrics_to_retain = MIN_MAX_METRICS;
        }

        let topics = &mut self.topics;
        if topics.input.is_empty() {
            topics.input = DEFAULT_INPUT_TOPIC.to_owned();
        }
        if topics.output.is_empty() {
            topics.output = DEFAULT_OUTPUT_TOPIC.to_owned();
        }
    }
}

/// Minimal version of a config for dumping out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MinimalConfig {
    /// The service part of the config.
    pub sluice: Sluice,
}

impl MinimalConfig {
    /// Saves the config in the given config folder as config.yml
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.save(path)
    }
}

impl ConfigObject for MinimalConfig {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A missing `config.yml` is not an error, in which case all defaults apply.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let mut values = if ConfigValues::path(&path).exists() {
            ConfigValues::load(&path)?
        } else {
            ConfigValues::default()
        };
        values.normalize();

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let mut values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values.normalize();

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let sluice = &mut self.values.sluice;

        if let Some(host) = overrides.host {
            sluice.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            sluice.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(core_name) = overrides.core_name {
            if core_name.is_empty() {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("core_name"));
            }
            sluice.core_name = Some(core_name);
        }

        let publish = &mut self.values.publish;

        if let Some(interval) = overrides.interval {
            publish.interval = interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "interval"))?;
        }

        if let Some(max_metrics) = overrides.max_metrics {
            publish.max_metrics_to_retain = max_metrics
                .parse()
                .map_err(|err| ConfigError::for_field(err, "max_metrics"))?;
        }

        if let Some(endpoint) = overrides.endpoint {
            publish.endpoint = endpoint
                .parse::<Url>()
                .map_err(|err| ConfigError::for_field(err, "endpoint"))?;
        }

        self.values.normalize();
        Ok(self)
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address the HTTP ingress binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        (self.values.sluice.host, self.values.sluice.port).into()
    }

    /// Returns the value of the `coreName` dimension attached to every metric.
    pub fn core_name(&self) -> String {
        if let Some(ref name) = self.values.sluice.core_name {
            return name.clone();
        }

        if let Some(name) = std::env::var("AWS_IOT_THING_NAME")
            .ok()
            .filter(|name| !name.is_empty())
        {
            return name;
        }

        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "sluice".to_owned())
    }

    /// Returns the interval between two timer-driven flushes of a namespace.
    ///
    /// A zero interval disables the timer and ships every metric as it arrives.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.values.publish.interval)
    }

    /// Returns the aggregate number of buffered metrics before new metrics replace old ones.
    pub fn max_metrics_to_retain(&self) -> usize {
        self.values.publish.max_metrics_to_retain
    }

    /// Returns the region of the remote service, if any.
    pub fn publish_region(&self) -> Option<String> {
        self.values
            .publish
            .region
            .clone()
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .filter(|region| !region.is_empty())
    }

    /// Returns the URL of the remote metrics ingestion service.
    pub fn publish_endpoint(&self) -> &Url {
        &self.values.publish.endpoint
    }

    /// Returns the timeout for a single remote call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.values.publish.request_timeout)
    }

    /// Returns the topic metric submissions are read from.
    pub fn input_topic(&self) -> &str {
        &self.values.topics.input
    }

    /// Returns the topic status messages are written to.
    pub fn output_topic(&self) -> &str {
        &self.values.topics.output
    }

    /// Returns the URL status messages are mirrored to, if configured.
    pub fn relay_upstream(&self) -> Option<&Url> {
        self.values.topics.relay_upstream.as_ref()
    }

    /// Returns the maximum size of a message published over HTTP.
    pub fn max_api_payload_size(&self) -> usize {
        self.values.limits.max_api_payload_size
    }

    /// Returns the number of messages a topic buffers per subscriber.
    pub fn max_pending_messages(&self) -> usize {
        self.values.limits.max_pending_messages.max(1)
    }

    /// Returns the time to wait for pending work after a shutdown signal.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the log configuration.
    pub fn logging(&self) -> &sluice_log::LogConfig {
        &self.values.logging
    }

    /// Returns the socket addresses for statsd.
    ///
    /// If stats is disabled an empty vector is returned.
    pub fn statsd_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        if let Some(ref addr) = self.values.metrics.statsd {
            let addrs = addr
                .as_str()
                .to_socket_addrs()
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue).file(&self.path))?
                .collect();
            Ok(addrs)
        } else {
            Ok(vec![])
        }
    }

    /// Return the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the size of the UDP buffer for statsd packets.
    pub fn metrics_buffer_size(&self) -> Option<usize> {
        self.values.metrics.buffer_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}
