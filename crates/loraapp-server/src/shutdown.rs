//! Signal handling and teardown.
//!
//! The first SIGINT/SIGTERM starts teardown: every listener observes the
//! shutdown watch and stops accepting. A second signal while teardown is
//! still running ends the wait at once.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use loraapp_types::{AppServerError, Result};

/// Upper bound on waiting for the listeners to stop.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(10);

/// A termination request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// How teardown ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownOutcome {
    /// Every listener task finished.
    Graceful,
    /// A second signal arrived, or the grace period ran out.
    Immediate,
}

/// Owns the shutdown watch and the stream of termination signals.
pub struct ShutdownCoordinator {
    signals: mpsc::Receiver<Signal>,
    shutdown_tx: watch::Sender<bool>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator fed by `signals`.
    pub fn new(signals: mpsc::Receiver<Signal>, grace: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            signals,
            shutdown_tx,
            grace,
        }
    }

    /// Creates a coordinator fed by the process's SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// [`AppServerError::ConfigError`] when the signal handlers cannot be
    /// installed.
    pub fn from_os_signals() -> Result<Self> {
        let (tx, rx) = mpsc::channel(4);
        spawn_signal_listener(tx)?;
        Ok(Self::new(rx, TEARDOWN_GRACE))
    }

    /// A receiver that flips to `true` once teardown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Waits for the first termination signal.
    ///
    /// Returns `None` when the signal source went away.
    pub async fn await_termination(&mut self) -> Option<Signal> {
        let signal = self.signals.recv().await;
        match signal {
            Some(signal) => tracing::info!(?signal, "signal received, stopping"),
            None => tracing::warn!("signal source closed, stopping"),
        }
        signal
    }

    /// Starts teardown and waits for `tasks` to finish, a second signal,
    /// or the grace period, whichever comes first.
    pub async fn initiate_shutdown(&mut self, tasks: Vec<JoinHandle<()>>) -> ShutdownOutcome {
        // No receivers left only means nothing is listening anymore.
        let _ = self.shutdown_tx.send(true);

        let join_all = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "listener task failed");
                }
            }
        };

        tokio::select! {
            _ = join_all => {
                tracing::info!("all listeners stopped");
                ShutdownOutcome::Graceful
            }
            Some(signal) = self.signals.recv() => {
                tracing::info!(?signal, "stopping immediately");
                ShutdownOutcome::Immediate
            }
            _ = tokio::time::sleep(self.grace) => {
                tracing::warn!(grace = ?self.grace, "listeners did not stop in time, stopping immediately");
                ShutdownOutcome::Immediate
            }
        }
    }
}

#[cfg(unix)]
fn spawn_signal_listener(tx: mpsc::Sender<Signal>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let install = |kind: SignalKind, name: &str| {
        signal(kind).map_err(|e| AppServerError::ConfigError {
            reason: format!("failed to install {name} handler: {e}"),
        })
    };
    let mut interrupt = install(SignalKind::interrupt(), "SIGINT")?;
    let mut terminate = install(SignalKind::terminate(), "SIGTERM")?;

    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                else => break,
            };
            if tx.send(signal).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(tx: mpsc::Sender<Signal>) -> Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Signal::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
