use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use docrelay_types::RenderMethod;
use url::Url;

/// Command-line arguments for the docrelay binary.
#[derive(Debug, Parser)]
#[command(
    name = "docrelay",
    version,
    about = "Render documents through a resilient fallback pipeline"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOCRELAY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render one document and print the outcome.
    Render(Box<RenderArgs>),
    /// Print the rendering method chain and the recovery table.
    Methods(MethodsArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Document URL (http or https).
    #[arg(value_name = "URL")]
    pub url: Url,

    /// Start with this method instead of the learned preference.
    #[arg(long = "method", value_name = "METHOD")]
    pub method: Option<RenderMethod>,

    /// Declared document size, used to pick a size class before fetching.
    #[arg(long = "content-length", value_name = "BYTES")]
    pub content_length: Option<u64>,

    /// Print the full result, diagnostics included, as JSON on stdout.
    #[arg(long = "json")]
    pub json: bool,

    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MethodsArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the per-fetch timeout.
    #[arg(long = "timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the per-attempt stage timeout.
    #[arg(long = "stage-timeout-seconds", value_name = "SECONDS")]
    pub stage_timeout_seconds: Option<u64>,

    /// Override the session attempt ceiling.
    #[arg(long = "max-attempts", value_name = "COUNT")]
    pub max_attempts: Option<u64>,

    /// Override the no-progress interval after which a session counts as stuck.
    #[arg(long = "stuck-threshold-seconds", value_name = "SECONDS")]
    pub stuck_threshold_seconds: Option<u64>,

    /// Enable the remote conversion method against this endpoint.
    #[arg(long = "conversion-endpoint", value_name = "URL")]
    pub conversion_endpoint: Option<String>,

    /// Enable signed-URL refresh against this endpoint.
    #[arg(long = "refresh-endpoint", value_name = "URL")]
    pub refresh_endpoint: Option<String>,

    /// Toggle the embedded native viewer method.
    #[arg(
        long = "embedded-viewer",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub embedded_viewer: Option<bool>,

    /// Toggle rendering of truncated downloads.
    #[arg(
        long = "partial-data",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub partial_data: Option<bool>,
}
