//! Xvfb-backed display allocation

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::process::ManagedProcess;

use super::{ActiveDisplay, DisplayAllocator, DisplayConfig, DisplayHandle};

/// First display number probed for availability
const DISPLAY_SEARCH_START: u32 = 20;
/// Upper bound of the display number search
const DISPLAY_SEARCH_END: u32 = 1000;
/// Poll interval while waiting for the X socket
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Allocates displays by spawning Xvfb on the first free display number.
pub struct XvfbAllocator;

#[async_trait]
impl DisplayAllocator for XvfbAllocator {
    async fn allocate(&self, config: &DisplayConfig) -> Result<ActiveDisplay> {
        let number = next_free_display(&config.lock_dir)?;
        let handle = DisplayHandle(number);

        let screen = format!("{}x{}x{}", config.width, config.height, config.depth);
        let args = vec![
            handle.display_string(),
            "-screen".to_string(),
            "0".to_string(),
            screen,
        ];

        let mut server = ManagedProcess::spawn("display-server", &config.binary, &args, None)
            .map_err(|e| AppError::ResourceAllocation(e.to_string()))?;

        // The display is usable once the X socket shows up
        let socket = Path::new(&config.socket_dir).join(format!("X{number}"));
        let deadline = Instant::now() + config.ready_timeout;

        loop {
            if socket.exists() {
                tracing::info!("Display {} ready", handle);
                return Ok(ActiveDisplay::new(handle, Some(server)));
            }

            match server.try_wait() {
                Ok(Some(status)) => {
                    let tail = server.logs(5).await.join(" | ");
                    return Err(AppError::ResourceAllocation(format!(
                        "display server exited early ({status}): {tail}"
                    )));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(AppError::ResourceAllocation(e.to_string()));
                }
            }

            if Instant::now() >= deadline {
                let _ = server.terminate(Duration::from_secs(1)).await;
                return Err(AppError::ResourceAllocation(format!(
                    "timed out waiting for {} after {:?}",
                    socket.display(),
                    config.ready_timeout
                )));
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// Find the lowest display number without an existing X lock file.
fn next_free_display(lock_dir: &str) -> Result<u32> {
    for number in DISPLAY_SEARCH_START..DISPLAY_SEARCH_END {
        let lock = Path::new(lock_dir).join(format!(".X{number}-lock"));
        if !lock.exists() {
            return Ok(number);
        }
    }
    Err(AppError::ResourceAllocation(format!(
        "no free display number in {DISPLAY_SEARCH_START}..{DISPLAY_SEARCH_END}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_free_display_skips_locked() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().to_str().unwrap();

        std::fs::write(dir.path().join(".X20-lock"), "123\n").unwrap();
        std::fs::write(dir.path().join(".X21-lock"), "456\n").unwrap();

        assert_eq!(next_free_display(lock_dir).unwrap(), 22);
    }

    #[test]
    fn test_next_free_display_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            next_free_display(dir.path().to_str().unwrap()).unwrap(),
            DISPLAY_SEARCH_START
        );
    }

    #[tokio::test]
    async fn test_allocate_reports_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let config = DisplayConfig {
            // A server that exits immediately never creates the socket
            binary: "/bin/false".to_string(),
            lock_dir: dir.path().to_str().unwrap().to_string(),
            socket_dir: dir.path().to_str().unwrap().to_string(),
            ready_timeout: Duration::from_secs(2),
            ..DisplayConfig::default()
        };

        let err = XvfbAllocator.allocate(&config).await.unwrap_err();
        assert!(matches!(err, AppError::ResourceAllocation(_)));
    }

    #[tokio::test]
    async fn test_allocate_waits_for_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_dir = dir.path().join("sockets");
        std::fs::create_dir(&socket_dir).unwrap();

        // Stub display server: strips the leading ':' from its display
        // argument, creates the socket file, then idles like Xvfb would.
        let script = dir.path().join("fake-xvfb");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nn=${{1#:}}\ntouch {}/X$n\nexec sleep 30\n",
                socket_dir.display()
            ),
        )
        .unwrap();
        make_executable(&script);

        let config = DisplayConfig {
            binary: script.to_str().unwrap().to_string(),
            lock_dir: dir.path().to_str().unwrap().to_string(),
            socket_dir: socket_dir.to_str().unwrap().to_string(),
            ready_timeout: Duration::from_secs(5),
            ..DisplayConfig::default()
        };

        let mut display = XvfbAllocator.allocate(&config).await.unwrap();
        assert_eq!(display.handle(), DisplayHandle(DISPLAY_SEARCH_START));

        display.release(Duration::from_secs(2)).await;
    }

    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}
