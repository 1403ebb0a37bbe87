//! Connect, follow the daemon, disconnect.

use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use reachylink_core::{ConnectOptions, Connection, ConnectionEvent, ConnectionMode};

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::commands::Target;
use crate::error::CliError;
use crate::output::{self, EventView};

pub async fn handle(args: &ConnectArgs, target: Target, global: &GlobalOpts) -> Result<(), CliError> {
    let Target {
        mode,
        options,
        connection: settings,
        ..
    } = target;
    let connection = Connection::new(settings)?;
    let view = EventView {
        format: global.output,
        color: output::should_color(global.color),
        telemetry: args.telemetry,
        daemon_output: global.verbose > 0,
    };

    let (stop_tx, stop_rx) = oneshot::channel();
    let printer = tokio::spawn(print_events(connection.events(), view, global.quiet, stop_rx));

    let result = session(&connection, args, mode, options).await;

    connection.disconnect().await;
    let _ = stop_tx.send(());
    let _ = printer.await;

    if args.logs && !global.quiet {
        for line in connection.daemon_logs() {
            eprintln!("{line}");
        }
    }
    result
}

async fn session(
    connection: &Connection,
    args: &ConnectArgs,
    mode: ConnectionMode,
    options: ConnectOptions,
) -> Result<(), CliError> {
    if !connection.connect(mode, options).await? {
        return Err(CliError::ConnectionFailed {
            reason: "another session is already in progress".into(),
        });
    }
    info!(%mode, status = %connection.status(), "connected");

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, disconnecting");
        }
        () = deadline => info!("duration elapsed, disconnecting"),
    }
    Ok(())
}

/// Print events until `stop` fires, then flush whatever is still queued.
async fn print_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    view: EventView,
    quiet: bool,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => print_event(&event, view, quiet),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event, view, quiet);
    }
}

fn print_event(event: &ConnectionEvent, view: EventView, quiet: bool) {
    if let Some(line) = output::render_event(event, view) {
        output::print_output(&line, quiet);
    }
}
