//! paperdash daemon entry point.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use paperdash::{
    create_driver, ArtifactSink, Config, DisplayController, MetricsRecorder, Orchestrator,
    RenderSession,
};

#[derive(Parser, Debug)]
#[command(
    name = "paperdash",
    version,
    about = "Web dashboard daemon for e-paper panels"
)]
struct Cli {
    /// Update the display once and exit
    #[arg(long)]
    update: bool,

    /// Drive the panel with a synthesized test pattern and exit
    #[arg(long)]
    test: bool,

    /// Run in continuous mode (default)
    #[arg(long)]
    continuous: bool,

    /// Enable debug logging and per-cycle frame dumps
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "paperdash=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Flip the stop flag on SIGINT so the main loop winds down between
/// cycles instead of dying mid-panel-write.
fn install_stop_handler(stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!(error = %e, "signal handler unavailable");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stop signal received");
                stop.store(true, Ordering::SeqCst);
            }
        });
    });
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if cli.debug {
        config.debug = true;
    }
    init_tracing(config.debug);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    let driver = create_driver(&config);
    let attach_debug_sink = config.debug && driver.name() != "simulated";
    let mut display = DisplayController::new(driver, &config);
    if attach_debug_sink {
        display = display.with_debug_sink(ArtifactSink::new(&config.artifact_dir));
    }
    if let Err(e) = display.initialize() {
        // Not fatal: cycles will fail with HardwareNotReady until the panel
        // comes back, and simulation is unaffected
        tracing::error!(error = %e, "panel initialization failed");
    }
    // Bind field values to locals first: inside `tracing::info!`, a bare
    // `display` identifier resolves to tracing's internal `display` field
    // helper rather than the local `display` variable.
    let ready = display.is_ready();
    let width = display.width();
    let height = display.height();
    tracing::info!(ready, width, height, "panel controller initialized");

    let telemetry =
        MetricsRecorder::new().with_snapshot_path(config.artifact_dir.join("metrics.json"));

    let session_config = config.clone();
    let mut orchestrator = Orchestrator::new(
        &config,
        display,
        Box::new(telemetry),
        move || RenderSession::start(&session_config),
    );
    install_stop_handler(orchestrator.stop_handle());

    let outcome = if cli.test {
        orchestrator.run_test_pattern()
    } else if cli.update {
        orchestrator.run_cycle(true)
    } else {
        orchestrator.run_continuous();
        Ok(())
    };

    orchestrator.shutdown();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "exiting with failure");
            ExitCode::FAILURE
        }
    }
}
