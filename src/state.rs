use std::sync::Arc;

use tokio::sync::broadcast;

use crate::display::DisplayRegistry;
use crate::events::EventBus;
use crate::supervisor::AppSupervisor;
use crate::webrtc::SessionBroker;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Application supervisor (display, guest, encoder)
    pub supervisor: Arc<AppSupervisor>,
    /// Media session broker
    pub broker: Arc<SessionBroker>,
    /// Publish point for the current display handle
    pub display_registry: Arc<DisplayRegistry>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        supervisor: Arc<AppSupervisor>,
        broker: Arc<SessionBroker>,
        display_registry: Arc<DisplayRegistry>,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            broker,
            display_registry,
            events,
            shutdown_tx,
        })
    }
}
