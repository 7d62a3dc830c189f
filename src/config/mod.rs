//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    application::{
        canvas::CanvasConfig,
        methods::DEFAULT_MANIFEST_SUFFIX,
        orchestrator::{DEFAULT_MAX_ATTEMPTS, DEFAULT_REFRESH_TIMEOUT, MethodsConfig},
        progress::ProgressConfig,
        recovery::RecoveryConfig,
    },
    domain::context::{DEFAULT_FETCH_TIMEOUT, DEFAULT_STAGE_TIMEOUT, RenderOptions},
    infra::network::{NetworkConfig, PartialDataPolicy, RetryPolicy, default_user_agent},
};

pub use cli::{
    CliArgs, Command, LoggingOverrides, MethodsArgs, RenderArgs, RenderOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "docrelay";
const ENV_PREFIX: &str = "DOCRELAY";
const DEFAULT_DIAGNOSTICS_RETENTION: u64 = 64;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub network: NetworkConfig,
    pub canvas: CanvasConfig,
    pub progress: ProgressConfig,
    pub recovery: RecoveryConfig,
    pub methods: MethodsConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_attempts: NonZeroU32,
    pub stage_timeout: Duration,
    pub diagnostics_retention: NonZeroUsize,
}

impl Settings {
    /// Per-session defaults; callers layer request-specific fields on top.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            timeout: self.network.timeout,
            stage_timeout: self.pipeline.stage_timeout,
            ..RenderOptions::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => raw.apply_render_overrides(&args.overrides),
        Command::Methods(args) => raw.apply_logging_overrides(&args.logging),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    network: RawNetworkSettings,
    canvas: RawCanvasSettings,
    progress: RawProgressSettings,
    recovery: RawRecoverySettings,
    methods: RawMethodsSettings,
    pipeline: RawPipelineSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        if let Some(seconds) = overrides.timeout_seconds {
            self.network.timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.stage_timeout_seconds {
            self.pipeline.stage_timeout_seconds = Some(seconds);
        }
        if let Some(count) = overrides.max_attempts {
            self.pipeline.max_attempts = Some(count);
        }
        if let Some(seconds) = overrides.stuck_threshold_seconds {
            self.progress.stuck_threshold_seconds = Some(seconds);
        }
        if let Some(endpoint) = overrides.conversion_endpoint.as_ref() {
            self.methods.conversion_endpoint = Some(endpoint.clone());
        }
        if let Some(endpoint) = overrides.refresh_endpoint.as_ref() {
            self.methods.refresh_endpoint = Some(endpoint.clone());
        }
        if let Some(enabled) = overrides.embedded_viewer {
            self.methods.embedded_viewer = Some(enabled);
        }
        if let Some(enabled) = overrides.partial_data {
            self.network.partial_data = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            network,
            canvas,
            progress,
            recovery,
            methods,
            pipeline,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let network = build_network_settings(network)?;
        let canvas = build_canvas_settings(canvas)?;
        let progress = build_progress_settings(progress)?;
        let recovery = build_recovery_settings(recovery)?;
        let methods = build_methods_settings(methods)?;
        let pipeline = build_pipeline_settings(pipeline)?;

        Ok(Self {
            logging,
            network,
            canvas,
            progress,
            recovery,
            methods,
            pipeline,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_network_settings(network: RawNetworkSettings) -> Result<NetworkConfig, LoadError> {
    let defaults = RetryPolicy::default();
    let timeout = positive_seconds(
        network.timeout_seconds,
        DEFAULT_FETCH_TIMEOUT,
        "network.timeout_seconds",
    )?;
    let base_delay = network
        .retry_base_delay_ms
        .map_or(defaults.base_delay, Duration::from_millis);
    let max_delay = network
        .retry_max_delay_ms
        .map_or(defaults.max_delay, Duration::from_millis);
    if max_delay < base_delay {
        return Err(LoadError::invalid(
            "network.retry_max_delay_ms",
            "must not be shorter than the base delay",
        ));
    }

    let user_agent = network
        .user_agent
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_user_agent().to_string());

    Ok(NetworkConfig {
        timeout,
        retry: RetryPolicy {
            base_delay,
            max_delay,
            max_retries: network.retry_max.unwrap_or(defaults.max_retries),
        },
        partial: PartialDataPolicy {
            enabled: network.partial_data.unwrap_or(true),
        },
        user_agent,
    })
}

fn build_canvas_settings(canvas: RawCanvasSettings) -> Result<CanvasConfig, LoadError> {
    let defaults = CanvasConfig::default();
    let memory_threshold_bytes = match canvas.memory_threshold_bytes {
        Some(0) => {
            return Err(LoadError::invalid(
                "canvas.memory_threshold_bytes",
                "must be greater than zero",
            ));
        }
        Some(bytes) => bytes,
        None => defaults.memory_threshold_bytes,
    };
    let max_surfaces = match canvas.max_surfaces {
        Some(count) => non_zero_usize(count, "canvas.max_surfaces")?.get(),
        None => defaults.max_surfaces,
    };
    let heap_ratio_limit = canvas.heap_ratio_limit.unwrap_or(defaults.heap_ratio_limit);
    if !(heap_ratio_limit > 0.0 && heap_ratio_limit <= 1.0) {
        return Err(LoadError::invalid(
            "canvas.heap_ratio_limit",
            "must be within (0, 1]",
        ));
    }

    Ok(CanvasConfig {
        memory_threshold_bytes,
        max_surfaces,
        idle_timeout: canvas
            .idle_timeout_seconds
            .map_or(defaults.idle_timeout, Duration::from_secs),
        heap_ratio_limit,
    })
}

fn build_progress_settings(progress: RawProgressSettings) -> Result<ProgressConfig, LoadError> {
    let defaults = ProgressConfig::default();
    let update_interval = match progress.update_interval_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "progress.update_interval_ms",
                "must be greater than zero",
            ));
        }
        Some(ms) => Duration::from_millis(ms),
        None => defaults.update_interval,
    };
    let stuck_threshold = positive_seconds(
        progress.stuck_threshold_seconds,
        defaults.stuck_threshold,
        "progress.stuck_threshold_seconds",
    )?;

    Ok(ProgressConfig {
        update_interval,
        stuck_threshold,
        purge_delay: progress
            .purge_delay_seconds
            .map_or(defaults.purge_delay, Duration::from_secs),
    })
}

fn build_recovery_settings(recovery: RawRecoverySettings) -> Result<RecoveryConfig, LoadError> {
    let defaults = RecoveryConfig::default();
    let network_retry_base = recovery
        .network_retry_base_ms
        .map_or(defaults.network_retry_base, Duration::from_millis);
    let network_retry_max_delay = recovery
        .network_retry_max_delay_ms
        .map_or(defaults.network_retry_max_delay, Duration::from_millis);
    if network_retry_max_delay < network_retry_base {
        return Err(LoadError::invalid(
            "recovery.network_retry_max_delay_ms",
            "must not be shorter than the base delay",
        ));
    }

    Ok(RecoveryConfig {
        network_retry_base,
        network_retry_max_delay,
        network_retry_max: recovery
            .network_retry_max
            .unwrap_or(defaults.network_retry_max),
        url_refresh_max: recovery.url_refresh_max.unwrap_or(defaults.url_refresh_max),
        canvas_recreation_max: recovery
            .canvas_recreation_max
            .unwrap_or(defaults.canvas_recreation_max),
        memory_cleanup_max: recovery
            .memory_cleanup_max
            .unwrap_or(defaults.memory_cleanup_max),
        memory_cooldown: recovery
            .memory_cooldown_ms
            .map_or(defaults.memory_cooldown, Duration::from_millis),
        timeout_extension_max: recovery
            .timeout_extension_max
            .unwrap_or(defaults.timeout_extension_max),
    })
}

fn build_methods_settings(methods: RawMethodsSettings) -> Result<MethodsConfig, LoadError> {
    let manifest_suffix = methods
        .manifest_suffix
        .unwrap_or_else(|| DEFAULT_MANIFEST_SUFFIX.to_string());
    if manifest_suffix.trim().is_empty() {
        return Err(LoadError::invalid(
            "methods.manifest_suffix",
            "suffix must not be empty",
        ));
    }

    Ok(MethodsConfig {
        manifest_suffix,
        embedded_viewer: methods.embedded_viewer.unwrap_or(true),
        conversion_endpoint: parse_endpoint(
            methods.conversion_endpoint,
            "methods.conversion_endpoint",
        )?,
        refresh_endpoint: parse_endpoint(methods.refresh_endpoint, "methods.refresh_endpoint")?,
        refresh_timeout: positive_seconds(
            methods.refresh_timeout_seconds,
            DEFAULT_REFRESH_TIMEOUT,
            "methods.refresh_timeout_seconds",
        )?,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    Ok(PipelineSettings {
        max_attempts: non_zero_u32(
            pipeline
                .max_attempts
                .unwrap_or(u64::from(DEFAULT_MAX_ATTEMPTS)),
            "pipeline.max_attempts",
        )?,
        stage_timeout: positive_seconds(
            pipeline.stage_timeout_seconds,
            DEFAULT_STAGE_TIMEOUT,
            "pipeline.stage_timeout_seconds",
        )?,
        diagnostics_retention: non_zero_usize(
            pipeline
                .diagnostics_retention
                .unwrap_or(DEFAULT_DIAGNOSTICS_RETENTION),
            "pipeline.diagnostics_retention",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNetworkSettings {
    timeout_seconds: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    retry_max: Option<u32>,
    partial_data: Option<bool>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCanvasSettings {
    memory_threshold_bytes: Option<u64>,
    max_surfaces: Option<u64>,
    idle_timeout_seconds: Option<u64>,
    heap_ratio_limit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProgressSettings {
    update_interval_ms: Option<u64>,
    stuck_threshold_seconds: Option<u64>,
    purge_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRecoverySettings {
    network_retry_base_ms: Option<u64>,
    network_retry_max_delay_ms: Option<u64>,
    network_retry_max: Option<u32>,
    url_refresh_max: Option<u32>,
    canvas_recreation_max: Option<u32>,
    memory_cleanup_max: Option<u32>,
    memory_cooldown_ms: Option<u64>,
    timeout_extension_max: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMethodsSettings {
    manifest_suffix: Option<String>,
    embedded_viewer: Option<bool>,
    conversion_endpoint: Option<String>,
    refresh_endpoint: Option<String>,
    refresh_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    max_attempts: Option<u64>,
    stage_timeout_seconds: Option<u64>,
    diagnostics_retention: Option<u64>,
}

fn positive_seconds(
    value: Option<u64>,
    default: Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(seconds) => Ok(Duration::from_secs(seconds)),
        None => Ok(default),
    }
}

/// Blank strings count as unset.
fn parse_endpoint(value: Option<String>, key: &'static str) -> Result<Option<Url>, LoadError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let url = Url::parse(trimmed)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{trimmed}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "endpoint must use http or https"));
    }
    Ok(Some(url))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
