// ── Local daemon process ──
//
// `CommandLauncher` spawns the daemon with piped stdio, forwards every
// output line, and reports the exit once both pipes have drained.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{LaunchSpec, ProcessLauncher, ProcessSignal};
use crate::config::LaunchConfig;
use crate::error::{CoreError, LifecycleFault};
use crate::event::OutputStream;

const SIGNAL_CHANNEL_SIZE: usize = 256;

/// Launches the daemon executable configured in [`LaunchConfig`].
pub struct CommandLauncher {
    config: LaunchConfig,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            kill: Mutex::new(None),
        }
    }

    /// Full argument list for `spec`: configured args, then mode flags.
    pub fn arguments(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = self.config.args.clone();
        if spec.simulated {
            // Physics only, no viewer window.
            args.push("--sim".into());
            args.push("--headless".into());
        }
        if let Some(port) = &spec.serial_port {
            args.push("--serialport".into());
            args.push(port.clone());
        }
        args
    }

    fn take_kill(&self) -> Option<oneshot::Sender<()>> {
        self.kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<mpsc::Receiver<ProcessSignal>, CoreError> {
        let args = self.arguments(spec);
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LifecycleFault::LaunchFailed {
                reason: format!("{}: {e}", self.config.program.display()),
            })?;

        info!(
            program = %self.config.program.display(),
            ?args,
            pid = child.id(),
            "daemon process launched"
        );

        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_SIZE);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                OutputStream::Stdout,
                tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                OutputStream::Stderr,
                tx.clone(),
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let previous = self
            .kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(kill_tx);
        if let Some(previous) = previous {
            warn!("replacing a daemon process that was never terminated");
            let _ = previous.send(());
        }

        tokio::spawn(watch_child(child, readers, kill_rx, tx));
        Ok(rx)
    }

    fn terminate(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        let kill = self.take_kill();
        Box::pin(async move {
            match kill {
                Some(kill) => {
                    info!("terminating daemon process");
                    let _ = kill.send(());
                }
                None => debug!("no daemon process to terminate"),
            }
            Ok(())
        })
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<ProcessSignal>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(ProcessSignal::Output { stream, line }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%stream, error = %e, "daemon output pipe failed");
                break;
            }
        }
    }
}

async fn watch_child(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    kill: oneshot::Receiver<()>,
    tx: mpsc::Sender<ProcessSignal>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill daemon process");
            }
            child.wait().await
        }
    };

    // Report output before the exit so classification sees every line.
    for reader in readers {
        let _ = reader.await;
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "failed to collect daemon exit status");
            None
        }
    };
    info!(?code, "daemon process exited");
    let _ = tx.send(ProcessSignal::Terminated { code }).await;
}
