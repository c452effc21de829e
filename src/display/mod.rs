//! Virtual display allocation
//!
//! The supervisor renders the guest application on an off-screen X
//! server (Xvfb). Allocation goes through the [`DisplayAllocator`] trait
//! so tests can substitute a display that has no backing server process.

mod registry;
mod xvfb;

pub use registry::DisplayRegistry;
pub use xvfb::XvfbAllocator;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::ManagedProcess;

/// Identifies one allocated virtual display (`:N`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayHandle(pub u32);

impl DisplayHandle {
    /// X11 display string, e.g. `:42`
    pub fn display_string(&self) -> String {
        format!(":{}", self.0)
    }
}

impl fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Virtual display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Display width in pixels
    pub width: u32,
    /// Display height in pixels
    pub height: u32,
    /// Color depth in bits
    pub depth: u32,
    /// Display server binary
    pub binary: String,
    /// Directory holding X lock files (`.X<n>-lock`)
    pub lock_dir: String,
    /// Directory holding X sockets (`X<n>`)
    pub socket_dir: String,
    /// How long to wait for the display server to come up
    pub ready_timeout: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            depth: 24,
            binary: "Xvfb".to_string(),
            lock_dir: "/tmp".to_string(),
            socket_dir: "/tmp/.X11-unix".to_string(),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// An allocated display plus the server process backing it.
///
/// Owned exclusively by the supervisor for the duration of one run; the
/// handle is invalid after [`ActiveDisplay::release`].
#[derive(Debug)]
pub struct ActiveDisplay {
    handle: DisplayHandle,
    server: Option<ManagedProcess>,
}

impl ActiveDisplay {
    pub fn new(handle: DisplayHandle, server: Option<ManagedProcess>) -> Self {
        Self { handle, server }
    }

    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }

    /// Stop the display server. Best-effort: a termination timeout is
    /// logged, not surfaced, and the handle is considered released
    /// either way.
    pub async fn release(&mut self, timeout: Duration) {
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.terminate(timeout).await {
                tracing::warn!("Failed to stop display server cleanly: {}", e);
            }
        }
        tracing::info!("Display {} released", self.handle);
    }
}

/// Display allocation interface
#[async_trait]
pub trait DisplayAllocator: Send + Sync {
    /// Allocate a fresh display ready for clients to connect.
    async fn allocate(&self, config: &DisplayConfig) -> Result<ActiveDisplay>;
}
