//! Presentation-layer publish point for the current display
//!
//! The supervisor writes the active display handle here once per start;
//! the UI layer (and `current_display`) reads it lock-free.

use arc_swap::ArcSwapOption;

use super::DisplayHandle;

/// Shared slot holding the currently active display, if any.
#[derive(Default)]
pub struct DisplayRegistry {
    current: ArcSwapOption<DisplayHandle>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the display of a freshly started run
    pub fn publish(&self, handle: DisplayHandle) {
        self.current.store(Some(std::sync::Arc::new(handle)));
        tracing::info!("Published display {}", handle);
    }

    /// Clear the slot on teardown
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Read the current display; `None` before any start and after stop
    pub fn get(&self) -> Option<DisplayHandle> {
        self.current.load().as_deref().copied()
    }
}
