//! Sidecar process execution
//!
//! The command must live inside the plugin directory. Output is buffered in
//! full; the child is killed (with its whole process group on unix) when the
//! timeout expires.

use super::BrokerError;
use crate::sandbox::PluginSandbox;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use unihub_plugin_api::{SpawnOutput, SpawnRequest};

pub(crate) async fn spawn(
    sandbox: &PluginSandbox,
    request: SpawnRequest,
    default_timeout: Duration,
) -> Result<SpawnOutput, BrokerError> {
    let program = sandbox.resolve_command(&request.command)?;
    let timeout = request
        .options
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    let mut command = Command::new(&program);
    command
        .args(&request.args)
        .current_dir(sandbox.root())
        .stdin(if request.options.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| {
        BrokerError::Process(format!("failed to start {}: {}", request.command, e))
    })?;
    tracing::debug!(command = %request.command, pid = ?child.id(), "Spawned sidecar");

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), request.options.input) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(error = %e, "Sidecar closed stdin early");
            }
        });
    }

    let pgid = child.id();
    let mut stdout = child.stdout.take().map(read_to_end);
    let mut stderr = child.stderr.take().map(read_to_end);

    // Output is complete only once every holder of the pipes has closed them,
    // so the deadline covers the readers as well as the child.
    let run = async {
        let status = child.wait().await;
        let out = collect(stdout.as_mut()).await;
        let err = collect(stderr.as_mut()).await;
        (status, out, err)
    };
    let finished = tokio::time::timeout(timeout, run).await;

    match finished {
        Ok((status, stdout, stderr)) => {
            kill_group(pgid);
            let status = status
                .map_err(|e| BrokerError::Process(format!("failed to wait for child: {}", e)))?;
            Ok(SpawnOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            })
        }
        Err(_) => {
            kill_group(pgid);
            terminate(&mut child).await;
            for reader in [stdout, stderr].into_iter().flatten() {
                reader.abort();
            }
            Err(BrokerError::ProcessTimeout {
                command: request.command,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

fn read_to_end<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Err(e) = stream.read_to_end(&mut buffer).await {
            tracing::debug!(error = %e, "Failed to read sidecar output");
        }
        buffer
    })
}

async fn collect(reader: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => match handle.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

/// Kill whatever is left of the sidecar's process group
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        // SAFETY: killpg only sends a signal; the group was created for this child.
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

/// Kill the child, then reap it
async fn terminate(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Sidecar already exited");
    }
    let _ = child.wait().await;
}
