//! Remote journal retrieval and streaming

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::deploy::process::unit_name;
use crate::errors::PortsideError;
use crate::ssh::CommandRunner;

fn journalctl(app: &str, port: u16, lines: u32, follow: bool) -> String {
    let mut command = format!(
        "journalctl -u {} -n {} --no-pager -o cat",
        unit_name(app, port),
        lines
    );
    if follow {
        command.push_str(" -f");
    }
    command
}

/// Fetch the last `lines` of a unit's journal.
pub async fn fetch(
    runner: &dyn CommandRunner,
    app: &str,
    port: u16,
    lines: u32,
) -> Result<String, PortsideError> {
    let command = journalctl(app, port, lines, false);
    debug!("{}", command);

    let output = runner.exec(&command).await?;
    if !output.success() {
        return Err(PortsideError::Command {
            command,
            output: output.output,
        });
    }
    Ok(output.output)
}

/// Follow a unit's journal, forwarding lines over `tx` until the remote
/// side closes, the receiver is dropped, or the shutdown future fires.
///
/// Runs as an independent long-lived reader; it shares no state with a
/// deployment in flight.
pub async fn follow(
    runner: Arc<dyn CommandRunner>,
    app: &str,
    port: u16,
    lines: u32,
    tx: mpsc::Sender<String>,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<(), PortsideError> {
    let command = journalctl(app, port, lines, true);
    info!("Following journal for {}", unit_name(app, port));

    tokio::select! {
        result = runner.exec_streamed(&command, tx) => {
            result.map(|_| ())
        }
        _ = shutdown_signal => {
            info!("Journal follow for {} shut down", unit_name(app, port));
            Ok(())
        }
    }
}
