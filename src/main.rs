use std::{
    io::{self, Write as _},
    process,
    sync::Arc,
};

use docrelay::{
    application::{
        error::{AppError, ErrorReport},
        orchestrator::{Orchestrator, PipelineConfig},
    },
    config::{self, Command, MethodsArgs, RenderArgs, Settings},
    domain::types::{PageContent, ProgressState, RenderMethod, RenderResult},
    infra::telemetry,
};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let summary = error.presentation_message();
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(summary, error = %report, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(summary, error = %report, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Render(args) => run_render(settings, *args).await,
        Command::Methods(args) => run_methods(settings, args),
    }
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let orchestrator = Orchestrator::builder(PipelineConfig::from(&settings)).build()?;

    let mut options = settings.render_options();
    options.preferred_method = args.method;
    options.content_length_hint = args.content_length;

    let context = orchestrator.prepare(args.url, options)?;
    let session_id = context.session_id;

    orchestrator.progress().subscribe(
        session_id,
        Arc::new(|state: &ProgressState| {
            debug!(
                target = "docrelay::cli",
                stage = %state.stage,
                percentage = state.percentage,
                bytes_loaded = state.bytes_loaded,
                "progress"
            );
        }),
    );
    // Nobody is around to press retry on a terminal, so stalls retry themselves.
    let tracker = orchestrator.progress().clone();
    orchestrator.progress().on_stuck(Arc::new(move |id: Uuid, state: &ProgressState| {
        warn!(
            target = "docrelay::cli",
            session_id = %id,
            stage = %state.stage,
            "Session stalled; forcing a retry"
        );
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tracker.force_retry(id);
        });
    }));

    let result = orchestrator.run(context).await;
    info!(
        target = "docrelay::cli",
        session_id = %result.session_id,
        success = result.success,
        pages = result.pages.len(),
        "Render finished"
    );

    if args.json {
        let body = serde_json::to_string_pretty(&result)
            .map_err(|err| AppError::unexpected(format!("failed to encode result: {err}")))?;
        write_stdout(&body)?;
    } else {
        write_stdout(&summarize(&result))?;
    }

    match result.error {
        Some(error) if !result.success => Err(AppError::from(error)),
        _ => Ok(()),
    }
}

fn run_methods(settings: Settings, _args: MethodsArgs) -> Result<(), AppError> {
    let orchestrator = Orchestrator::builder(PipelineConfig::from(&settings)).build()?;
    let chain = orchestrator.chain();

    let mut out = String::from("rendering methods (fallback order):\n");
    for (index, method) in RenderMethod::CHAIN.iter().enumerate() {
        let status = if chain.is_available(*method) {
            "available"
        } else {
            "disabled"
        };
        out.push_str(&format!("  {}. {:<30}{status}\n", index + 1, method.as_str()));
    }
    out.push_str("\nrecovery plan:\n");
    out.push_str(&orchestrator.recovery().describe_plan());
    write_stdout(&out)
}

fn summarize(result: &RenderResult) -> String {
    let mut out = String::new();
    match (&result.method, result.success) {
        (Some(method), true) => out.push_str(&format!(
            "rendered {} page(s) via {method}\n",
            result.pages.len()
        )),
        _ => out.push_str("rendering failed\n"),
    }
    for page in &result.pages {
        let line = match &page.content {
            PageContent::Pixels { width, height, .. } => format!("{width}x{height} pixels"),
            PageContent::Embedded { url } => format!("embedded viewer: {url}"),
            PageContent::Image {
                url: Some(url), ..
            } => format!("image: {url}"),
            PageContent::Image { data, .. } => format!("inline image ({} bytes)", data.len()),
            PageContent::Download { url } => format!("download: {url}"),
        };
        out.push_str(&format!("  page {}: {line}\n", page.number));
    }
    if let Some(report) = &result.diagnostics {
        out.push_str(&format!(
            "attempts: {}, recoveries: {}, elapsed: {} ms\n",
            report.attempts.len(),
            report.recoveries.len(),
            report.total_elapsed_ms
        ));
    }
    if let Some(error) = &result.error {
        out.push_str(&format!("error ({}): {}\n", error.kind, error.message));
    }
    out
}

fn write_stdout(text: &str) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            AppError::unexpected(
                ErrorReport::from_error("docrelay::cli", &err).to_string(),
            )
        })
}
