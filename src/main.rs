//! Lookout - container healthcheck supervisor
//!
//! Runs a container's healthcheck on a timer, drives the status through a
//! starting/healthy/unhealthy state machine, and reports every change to the
//! parent process over the OCI sync pipe.

mod cli;
mod error;
mod manifest;
mod sickbay;
mod sync_pipe;
mod sys;

use cli::{Cli, Commands, ExecArgs};
use error::Result;
use manifest::LookoutConfig;
use sickbay::{ExecMode, HealthConfig, Probe, ProbeExecutor, ProbeOutcome, StatusReporter, TimerRegistry};
use sync_pipe::{StatusSink, StdoutSink, SyncPipe};

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let directive = if verbose { "lookout=debug" } else { "lookout=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
        }

        Commands::Validate { bundle, annotation } => {
            let config = manifest::load_or_default(&cli.config)?;
            let health = match (bundle, annotation) {
                (Some(bundle), _) => {
                    match sickbay::discovery::discover_from_bundle(&bundle, &config.annotation)? {
                        Some(health) => health,
                        None => {
                            println!("No healthcheck configured in {}", bundle.display());
                            return Ok(());
                        }
                    }
                }
                (None, Some(json)) => sickbay::discovery::parse_annotation(&json)?,
                (None, None) => {
                    return Err(error::Error::HealthcheckInvalid(
                        "either --bundle or --annotation is required".to_string(),
                    ));
                }
            };
            print_health_config(&health);
        }

        Commands::Probe {
            cid,
            exec,
            timeout,
            command,
        } => {
            let config = manifest::load_or_default(&cli.config)?;
            let health = HealthConfig::new(command, 1, timeout, 0, 0)?;
            let executor = build_executor(&config, &exec);

            let outcome = executor.execute(&health, &cid);
            match &outcome {
                ProbeOutcome::Completed(code) => println!("exit code: {}", code),
                ProbeOutcome::InfraFailure(reason) => println!("probe failed to run: {}", reason),
            }
            println!("result: {}", if outcome.passed() { "passed" } else { "failed" });
            std::process::exit(outcome.exit_code());
        }

        Commands::Monitor {
            cid,
            bundle,
            exec,
            sync_pipe_fd,
        } => {
            let config = manifest::load_or_default(&cli.config)?;
            monitor(&config, &cid, &bundle, &exec, sync_pipe_fd)?;
        }
    }

    Ok(())
}

fn build_executor(config: &LookoutConfig, exec: &ExecArgs) -> ProbeExecutor {
    let mode = if exec.exec {
        ExecMode::Runtime(exec.runtime.clone().unwrap_or_else(|| config.runtime.clone()))
    } else {
        ExecMode::Direct
    };
    ProbeExecutor::new(mode).with_stderr_limit(config.stderr_limit)
}

fn print_health_config(health: &HealthConfig) {
    println!("test:         {:?}", health.test());
    println!("interval:     {}s", health.interval());
    println!("timeout:      {}s", health.timeout());
    println!("start period: {}s", health.start_period());
    println!("retries:      {}", health.retries());
}

/// Supervise one container until SIGINT or SIGTERM
fn monitor(
    config: &LookoutConfig,
    container_id: &str,
    bundle: &Path,
    exec: &ExecArgs,
    sync_pipe_fd: Option<i32>,
) -> Result<()> {
    if config.prefer_systemd && sys::systemd_available() {
        info!(container_id, "systemd detected, leaving healthchecks to systemd timers");
        return Ok(());
    }

    let health = match sickbay::discovery::discover_from_bundle(bundle, &config.annotation)? {
        Some(health) => health,
        None => {
            info!(container_id, bundle = %bundle.display(), "No healthcheck configured");
            return Ok(());
        }
    };

    let sink: Box<dyn StatusSink> = match sync_pipe_fd {
        Some(fd) => Box::new(SyncPipe::open(fd)?),
        None => Box::new(StdoutSink),
    };
    let (reporter, reporter_thread) =
        StatusReporter::spawn(sink, config.report_queue, config.report_timeout())?;

    let executor = build_executor(config, exec);
    let registry = TimerRegistry::new(Arc::new(executor), reporter);
    registry.register(container_id, health)?;
    info!(container_id, "Healthcheck supervisor running");

    let rt = tokio::runtime::Runtime::new()?;
    let waited = rt.block_on(wait_for_shutdown());
    if let Err(ref e) = waited {
        warn!(error = %e, "Signal handling failed, shutting down");
    }

    if let Some(last) = registry.snapshot(container_id) {
        info!(
            container_id,
            status = %last.status,
            failures = last.consecutive_failures,
            start_period_remaining = last.start_period_remaining,
            checked = last.last_check_time.is_some(),
            active = last.active,
            "Final healthcheck state"
        );
    }
    registry.shutdown();
    // Drops the last sender so the writer thread drains and exits
    drop(registry);
    reporter_thread.join();
    info!(container_id, "Healthcheck supervisor stopped");

    waited
}

async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }
    info!("Shutdown signal received");
    Ok(())
}
