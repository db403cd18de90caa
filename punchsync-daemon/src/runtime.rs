use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{io_err, DaemonError};
use crate::session::PollSession;

/// Totals over a continuous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub errors: u64,
    pub sent: usize,
    pub failed: usize,
}

/// Run `session` on a fresh multi-thread runtime until Ctrl-C or SIGTERM.
pub fn start_blocking(session: PollSession) -> Result<RunSummary, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        let (stop_tx, stop_rx) = watch::channel(false);
        let signals = spawn_signal_listener(stop_tx);
        let result = run(session, stop_rx).await;
        signals.abort();
        result
    })
}

/// Poll until `stop` flips to `true`.
///
/// Each iteration runs on the blocking pool. The stop flag is checked before
/// every iteration and interrupts the sleep between iterations, never a send.
/// A failing or panicking iteration is logged and counted, and the loop goes on.
pub async fn run(
    mut session: PollSession,
    mut stop: watch::Receiver<bool>,
) -> Result<RunSummary, DaemonError> {
    let interval = session.settings().interval;
    let mut summary = RunSummary::default();

    tracing::info!(
        device = %session.identity(),
        interval_secs = interval.as_secs(),
        batch_size = session.settings().batch_size,
        "real-time sync active"
    );

    loop {
        if *stop.borrow() {
            break;
        }

        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| session.tick()));
            (session, outcome)
        })
        .await
        .map_err(|err| DaemonError::Join {
            task: "poll iteration",
            message: err.to_string(),
        })?;
        session = returned;
        summary.iterations += 1;

        match outcome {
            Ok(Ok(report)) => {
                if let Some(result) = report.result {
                    summary.sent += result.sent;
                    summary.failed += result.failed;
                }
            }
            Ok(Err(err)) => {
                summary.errors += 1;
                tracing::error!(device = %session.identity(), iteration = session.iteration(), error = %err, "error during sync iteration");
            }
            Err(payload) => {
                summary.errors += 1;
                tracing::error!(device = %session.identity(), iteration = session.iteration(), panic = panic_message(payload.as_ref()), "sync iteration panicked");
            }
        }

        if !wait_or_stop(&mut stop, interval).await {
            break;
        }
    }

    tracing::info!(device = %session.identity(), iterations = summary.iterations, sent = summary.sent, "real-time sync stopped gracefully");
    tokio::task::spawn_blocking(move || session.disconnect())
        .await
        .map_err(|err| DaemonError::Join {
            task: "device disconnect",
            message: err.to_string(),
        })?;
    Ok(summary)
}

/// Sleep for `interval` unless a stop arrives first. `false` means stop.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => !*stop.borrow(),
        changed = stop.changed() => match changed {
            Ok(()) => !*stop.borrow(),
            // Sender dropped.
            Err(_) => false,
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Flip `stop` on Ctrl-C or SIGTERM.
pub fn spawn_signal_listener(stop: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("shutdown signal received, stopping gracefully");
        let _ = stop.send(true);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable; listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Install the global subscriber on stderr. `RUST_LOG` wins over `debug`.
pub fn init_tracing(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
