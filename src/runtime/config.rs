use crate::remote::options::{RemoteClientOptions, DEFAULT_API_URL, DEFAULT_BACKOFF_MULTIPLIER};
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ROOT_PATH: &str = "";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_BREAKER_RESET_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BREAKER_HALF_OPEN_MAX_TRIES: usize = 1;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEALTH_POLL_INTERVAL_MS: u64 = 500;

const ENV_PREFIX: &str = "DROPWATCH_";

/// Runtime configuration for the watcher.
///
/// All instances must be constructed via [`WatchConfig::builder`], [`WatchConfig::new`], or
/// [`WatchConfig::from_env`] so invariants are validated before any consumer observes the values.
#[derive(Clone, PartialEq)]
pub struct WatchConfig {
    api_url: String,
    access_token: String,
    root_path: String,
    poll_interval: Duration,
    request_timeout: Duration,
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    breaker_failure_threshold: usize,
    breaker_reset_timeout: Duration,
    breaker_half_open_max_tries: usize,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    health_poll_interval: Duration,
    metrics_interval: Duration,
}

impl std::fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchConfig")
            .field("api_url", &self.api_url)
            .field("access_token", &"<redacted>")
            .field("root_path", &self.root_path)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("breaker_failure_threshold", &self.breaker_failure_threshold)
            .field("breaker_reset_timeout", &self.breaker_reset_timeout)
            .field(
                "breaker_half_open_max_tries",
                &self.breaker_half_open_max_tries,
            )
            .field("startup_timeout", &self.startup_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("health_poll_interval", &self.health_poll_interval)
            .field("metrics_interval", &self.metrics_interval)
            .finish()
    }
}

pub struct WatchConfigParams {
    pub api_url: String,
    pub access_token: String,
    pub root_path: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub breaker_failure_threshold: usize,
    pub breaker_reset_timeout: Duration,
    pub breaker_half_open_max_tries: usize,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub health_poll_interval: Duration,
    pub metrics_interval: Duration,
}

impl WatchConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WatchConfigBuilder {
        WatchConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`WatchConfig::builder`] when most values use defaults.
    pub fn new(params: WatchConfigParams) -> Result<Self> {
        let WatchConfigParams {
            api_url,
            access_token,
            root_path,
            poll_interval,
            request_timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            breaker_failure_threshold,
            breaker_reset_timeout,
            breaker_half_open_max_tries,
            startup_timeout,
            shutdown_timeout,
            health_poll_interval,
            metrics_interval,
        } = params;

        let config = Self {
            api_url: trimmed_string(api_url),
            access_token: trimmed_string(access_token),
            root_path: trimmed_string(root_path),
            poll_interval,
            request_timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            breaker_failure_threshold,
            breaker_reset_timeout,
            breaker_half_open_max_tries,
            startup_timeout,
            shutdown_timeout,
            health_poll_interval,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `DROPWATCH_*` environment variables.
    ///
    /// `DROPWATCH_ACCESS_TOKEN` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WatchConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };
        let mut builder = WatchConfig::builder().access_token(
            env.string("ACCESS_TOKEN")
                .context("DROPWATCH_ACCESS_TOKEN is required")?,
        );

        if let Some(url) = env.string("API_URL") {
            builder = builder.api_url(url);
        }
        if let Some(path) = env.string("ROOT_PATH") {
            builder = builder.root_path(path);
        }
        if let Some(secs) = env.parse::<u64>("POLL_INTERVAL_SECS")? {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parse::<u64>("REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = env.parse::<usize>("MAX_RETRIES")? {
            builder = builder.max_retries(retries);
        }
        if let Some(ms) = env.parse::<u64>("INITIAL_BACKOFF_MS")? {
            builder = builder.initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env.parse::<u64>("MAX_BACKOFF_MS")? {
            builder = builder.max_backoff(Duration::from_millis(ms));
        }
        if let Some(multiplier) = env.parse::<f64>("BACKOFF_MULTIPLIER")? {
            builder = builder.backoff_multiplier(multiplier);
        }
        if let Some(threshold) = env.parse::<usize>("BREAKER_FAILURE_THRESHOLD")? {
            builder = builder.breaker_failure_threshold(threshold);
        }
        if let Some(secs) = env.parse::<u64>("BREAKER_RESET_TIMEOUT_SECS")? {
            builder = builder.breaker_reset_timeout(Duration::from_secs(secs));
        }
        if let Some(tries) = env.parse::<usize>("BREAKER_HALF_OPEN_MAX_TRIES")? {
            builder = builder.breaker_half_open_max_tries(tries);
        }
        if let Some(secs) = env.parse::<u64>("STARTUP_TIMEOUT_SECS")? {
            builder = builder.startup_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parse::<u64>("SHUTDOWN_TIMEOUT_SECS")? {
            builder = builder.shutdown_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = env.parse::<u64>("HEALTH_POLL_INTERVAL_MS")? {
            builder = builder.health_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = env.parse::<u64>("METRICS_INTERVAL_SECS")? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Base URL of the remote listing API.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Bearer credential sent with every request.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Folder tree being watched; empty means the account root.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Interval between sync ticks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-request timeout applied to the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Consecutive failures that open the circuit.
    pub fn breaker_failure_threshold(&self) -> usize {
        self.breaker_failure_threshold
    }

    pub fn breaker_reset_timeout(&self) -> Duration {
        self.breaker_reset_timeout
    }

    pub fn breaker_half_open_max_tries(&self) -> usize {
        self.breaker_half_open_max_tries
    }

    /// Bound on one component's start plus its wait for health.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Bound on one component's stop.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn health_poll_interval(&self) -> Duration {
        self.health_poll_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Retry and timeout knobs for the remote client.
    pub fn remote_options(&self) -> RemoteClientOptions {
        RemoteClientOptions {
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.api_url)?;
        ensure_not_empty(&self.access_token, "access_token")?;

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.breaker_failure_threshold == 0 {
            bail!("breaker_failure_threshold must be greater than 0");
        }

        if self.breaker_reset_timeout.is_zero() {
            bail!("breaker_reset_timeout must be greater than 0");
        }

        if self.breaker_half_open_max_tries == 0 {
            bail!("breaker_half_open_max_tries must be greater than 0");
        }

        if self.startup_timeout.is_zero() {
            bail!("startup_timeout must be greater than 0");
        }

        if self.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        if self.health_poll_interval.is_zero() {
            bail!("health_poll_interval must be greater than 0");
        }

        if self.health_poll_interval > self.startup_timeout {
            bail!(
                "health_poll_interval ({:?}) must not exceed startup_timeout ({:?})",
                self.health_poll_interval,
                self.startup_timeout,
            );
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        self.remote_options().validate()
    }
}

#[derive(Debug, Default, Clone)]
pub struct WatchConfigBuilder {
    api_url: Option<String>,
    access_token: Option<String>,
    root_path: Option<String>,
    poll_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    max_retries: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    backoff_multiplier: Option<f64>,
    breaker_failure_threshold: Option<usize>,
    breaker_reset_timeout: Option<Duration>,
    breaker_half_open_max_tries: Option<usize>,
    startup_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    health_poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl WatchConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn root_path(mut self, path: impl Into<String>) -> Self {
        self.root_path = Some(path.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn breaker_failure_threshold(mut self, threshold: usize) -> Self {
        self.breaker_failure_threshold = Some(threshold);
        self
    }

    pub fn breaker_reset_timeout(mut self, timeout: Duration) -> Self {
        self.breaker_reset_timeout = Some(timeout);
        self
    }

    pub fn breaker_half_open_max_tries(mut self, tries: usize) -> Self {
        self.breaker_half_open_max_tries = Some(tries);
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn health_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<WatchConfig> {
        let params = WatchConfigParams {
            api_url: self.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            access_token: self.access_token.context("access_token is required")?,
            root_path: self
                .root_path
                .unwrap_or_else(|| DEFAULT_ROOT_PATH.to_owned()),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            initial_backoff: self
                .initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS)),
            max_backoff: self
                .max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_MAX_BACKOFF_MS)),
            backoff_multiplier: self
                .backoff_multiplier
                .unwrap_or(DEFAULT_BACKOFF_MULTIPLIER),
            breaker_failure_threshold: self
                .breaker_failure_threshold
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            breaker_reset_timeout: self
                .breaker_reset_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BREAKER_RESET_TIMEOUT_SECS)),
            breaker_half_open_max_tries: self
                .breaker_half_open_max_tries
                .unwrap_or(DEFAULT_BREAKER_HALF_OPEN_MAX_TRIES),
            startup_timeout: self
                .startup_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS)),
            shutdown_timeout: self
                .shutdown_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)),
            health_poll_interval: self
                .health_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_HEALTH_POLL_INTERVAL_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        WatchConfig::new(params)
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, suffix: &str) -> Option<String> {
        match (self.lookup)(&format!("{ENV_PREFIX}{suffix}")) {
            Some(value) if !value.trim().is_empty() => Some(value),
            _ => None,
        }
    }

    fn parse<T>(&self, suffix: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(suffix) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("failed to parse {ENV_PREFIX}{suffix}='{value}'")),
            None => Ok(None),
        }
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("api_url must start with http:// or https://");
    }
    Ok(())
}
