//! Optional ComfyUI process launcher.
//!
//! When this process owns the backend, the configured command is spawned
//! through the shell at startup. The child is killed when the supervising
//! task is dropped, so it never outlives the server.

use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;

/// Spawn `command` via `sh -c` and supervise it.
///
/// The returned task resolves to the exit code once the backend exits
/// (`None` if it was killed by a signal or could not be waited on).
pub fn launch_backend(command: &str) -> std::io::Result<JoinHandle<Option<i32>>> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    tracing::info!(command, pid = ?child.id(), "Launched ComfyUI backend");

    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {
                tracing::info!("ComfyUI backend exited");
                status.code()
            }
            Ok(status) => {
                tracing::error!(exit_code = ?status.code(), "ComfyUI backend exited with failure");
                status.code()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to wait on ComfyUI backend");
                None
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_exit_code() {
        let handle = launch_backend("exit 3").unwrap();
        assert_eq!(handle.await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn aborting_supervisor_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let handle = launch_backend(&format!("sleep 2 && touch {}", marker.display())).unwrap();

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }
}
