use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use tasknode::config::NodeConfig;
use tasknode::executor::ExecutorRegistry;
use tasknode::http;
use tasknode::resources::{ProcProbe, ResourceProbe, StaticProbe};
use tasknode::scheduler::Scheduler;
use tasknode::source::{INTAKE_BACKOFF, ResultSink, spawn_intake_loop};
use tasknode::stdio::{JsonLinesSink, JsonLinesSource};
use tasknode::telemetry::{LogTelemetrySink, spawn_status_reporter};

/// How often shutdown-on-EOF checks for remaining work.
const DRAIN_POLL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries task outcomes, so logs go to stderr (and optionally a
    // daily file). Keep the guard alive until exit to flush the file writer.
    let _log_guard = init_tracing();

    let config = NodeConfig::from_env().context("invalid TASKNODE_* configuration")?;

    eprintln!("tasknode v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.pool.resolved_worker_count());
    eprintln!("   Max concurrent: {}", config.scheduler.max_concurrent_tasks);
    if config.http.enabled {
        eprintln!("   Status: http://0.0.0.0:{}/status", config.http.port);
    }
    eprintln!("   Reading JSON tasks from stdin, writing outcomes to stdout.\n");

    let probe: Arc<dyn ResourceProbe> = match std::env::var("TASKNODE_PROBE").as_deref() {
        Ok("static") => Arc::new(StaticProbe::healthy()),
        _ => Arc::new(ProcProbe::new().with_disk_path(config.resources.disk_path.clone())),
    };
    let executors = Arc::new(ExecutorRegistry::with_builtins());
    let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::stdout());

    let scheduler = Scheduler::new(&config, probe, executors, Arc::clone(&sink));
    scheduler
        .start()
        .await
        .context("failed to start scheduler")?;

    let _reporter = spawn_status_reporter(
        Arc::clone(&scheduler),
        Arc::new(LogTelemetrySink),
        config.scheduler.status_report_interval,
    );

    if config.http.enabled {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http.port))
            .await
            .with_context(|| format!("failed to bind HTTP port {}", config.http.port))?;
        let app = http::routes(Arc::clone(&scheduler));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server exited");
            }
        });
    }

    let intake = spawn_intake_loop(
        Arc::new(JsonLinesSource::stdin()),
        Arc::clone(&scheduler),
        Arc::clone(&sink),
        INTAKE_BACKOFF,
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
        _ = async {
            let _ = intake.await;
            // Input closed: let admitted work finish.
            while scheduler.registry().active_count().await > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        } => {
            info!("Input drained, shutting down");
        }
    }

    scheduler.stop().await;
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match std::env::var("TASKNODE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tasknode.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}
