//! Application supervisor
//!
//! Owns the three-tier subprocess pipeline behind a supervised run:
//! virtual display, guest application, capture encoder. Acquisition is
//! display → guest → encoder; release is strictly the reverse, so no
//! child ever outlives the resource it depends on.

pub mod encoder;

pub use encoder::{EncoderConfig, DEFAULT_STREAM_DESTINATION};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::display::{ActiveDisplay, DisplayAllocator, DisplayConfig, DisplayHandle, DisplayRegistry, XvfbAllocator};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::process::ManagedProcess;

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Virtual display settings
    pub display: DisplayConfig,
    /// Capture encoder settings
    pub encoder: EncoderConfig,
    /// Graceful termination window before SIGKILL
    pub terminate_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            encoder: EncoderConfig::default(),
            terminate_timeout: Duration::from_secs(5),
        }
    }
}

/// One live display → guest → encoder stack
struct Pipeline {
    display: ActiveDisplay,
    guest: ManagedProcess,
    encoder: Option<ManagedProcess>,
}

/// Supervises the display server, guest application and capture encoder.
///
/// All lifecycle operations are serialized through one async mutex: no
/// two start/stop sequences for the same supervisor ever interleave.
pub struct AppSupervisor {
    config: SupervisorConfig,
    allocator: Arc<dyn DisplayAllocator>,
    registry: Arc<DisplayRegistry>,
    events: Arc<EventBus>,
    pipeline: Mutex<Option<Pipeline>>,
}

impl AppSupervisor {
    /// Create a supervisor backed by Xvfb
    pub fn new(
        config: SupervisorConfig,
        registry: Arc<DisplayRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_allocator(config, Arc::new(XvfbAllocator), registry, events)
    }

    /// Create a supervisor with a custom display allocator
    pub fn with_allocator(
        config: SupervisorConfig,
        allocator: Arc<dyn DisplayAllocator>,
        registry: Arc<DisplayRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            allocator,
            registry,
            events,
            pipeline: Mutex::new(None),
        }
    }

    /// Start a supervised run of the given guest command.
    ///
    /// On any failure, everything acquired earlier in this call is
    /// released (encoder, guest, display — whichever exist) before the
    /// error is returned; no partial pipeline is ever left live.
    pub async fn start(&self, command: &[String]) -> Result<DisplayHandle> {
        let Some((program, args)) = command.split_first() else {
            return Err(AppError::Config("guest command is empty".to_string()));
        };

        let mut slot = self.pipeline.lock().await;
        if slot.is_some() {
            return Err(AppError::ResourceAllocation(
                "a supervised run is already active".to_string(),
            ));
        }

        let mut display = self.allocator.allocate(&self.config.display).await?;
        let handle = display.handle();

        let mut guest = match self.launch_guest(program, args, handle) {
            Ok(guest) => guest,
            Err(e) => {
                display.release(self.config.terminate_timeout).await;
                return Err(e);
            }
        };

        let encoder = match encoder::launch(&self.config.encoder, handle) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.terminate_logged(&mut guest).await;
                display.release(self.config.terminate_timeout).await;
                return Err(e);
            }
        };

        self.registry.publish(handle);
        self.events.publish(SystemEvent::SupervisorStarted {
            display: handle.0,
            guest_pid: guest.id(),
            encoder_pid: encoder.id(),
        });

        *slot = Some(Pipeline {
            display,
            guest,
            encoder: Some(encoder),
        });

        Ok(handle)
    }

    /// Tear down the supervised run: encoder, then guest, then display.
    ///
    /// Idempotent and infallible: termination timeouts are logged as
    /// soft errors and teardown continues with the remaining resources.
    pub async fn stop(&self) {
        let mut slot = self.pipeline.lock().await;
        let Some(mut pipeline) = slot.take() else {
            tracing::debug!("Supervisor stop with nothing running");
            return;
        };

        self.registry.clear();

        if let Some(mut encoder) = pipeline.encoder.take() {
            self.terminate_logged(&mut encoder).await;
        }
        self.terminate_logged(&mut pipeline.guest).await;
        pipeline.display.release(self.config.terminate_timeout).await;

        self.events.publish(SystemEvent::SupervisorStopped);
    }

    /// Display handle of the active run, `None` otherwise
    pub fn current_display(&self) -> Option<DisplayHandle> {
        self.registry.get()
    }

    /// Whether a supervised run is currently live
    pub async fn is_running(&self) -> bool {
        self.pipeline.lock().await.is_some()
    }

    /// Guest environment: exactly the display binding plus the host's
    /// runtime-directory binding, nothing inherited.
    fn guest_env(&self, handle: DisplayHandle) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("DISPLAY".to_string(), handle.display_string());
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            env.insert("XDG_RUNTIME_DIR".to_string(), runtime_dir);
        }
        env
    }

    fn launch_guest(
        &self,
        program: &str,
        args: &[String],
        handle: DisplayHandle,
    ) -> Result<ManagedProcess> {
        let env = self.guest_env(handle);
        ManagedProcess::spawn("guest", program, args, Some(&env))
    }

    async fn terminate_logged(&self, process: &mut ManagedProcess) {
        if let Err(e) = process.terminate(self.config.terminate_timeout).await {
            tracing::warn!("{}", e);
            if let AppError::ProcessTermination { process, .. } = e {
                self.events
                    .publish(SystemEvent::TerminationTimeout { process });
            }
        }
    }
}
