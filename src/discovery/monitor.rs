//! Dedup and launch loop over a discovery strategy.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Discovery, StreamLauncher};
use crate::engine::EngineError;
use crate::messaging::{Event, EventBus};
use crate::streams::StreamRegistry;

/// Consecutive discovery errors tolerated before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Registers newly seen streams, announces them and launches their work.
pub struct DiscoveryMonitor {
    registry: Arc<StreamRegistry>,
    bus: Arc<EventBus>,
    launcher: Arc<dyn StreamLauncher>,
    max_consecutive_errors: u32,
    error_delay: Duration,
}

impl DiscoveryMonitor {
    pub fn new(
        registry: Arc<StreamRegistry>,
        bus: Arc<EventBus>,
        launcher: Arc<dyn StreamLauncher>,
    ) -> Self {
        Self {
            registry,
            bus,
            launcher,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            error_delay: Duration::from_millis(200),
        }
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    /// Pause after a failed read before trying again.
    pub fn with_error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    /// Handle one observed name. Returns true if the stream is new.
    pub fn observe(&self, name: &str) -> bool {
        let (stream, created) = self.registry.register(name);
        if created {
            info!(stream = %name, "Stream discovered");
            self.bus.publish(Event::stream_discovered(stream.clone()));
            self.launcher.launch(&stream);
        }
        created
    }

    /// Consume `discovery` until cancelled.
    ///
    /// Errors are counted; a successful read resets the count. Going over
    /// the allowed number of consecutive errors ends the loop with
    /// [`EngineError::DiscoveryExhausted`].
    pub async fn run(
        &self,
        discovery: &mut dyn Discovery,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut errors = 0u32;
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = discovery.next_batch() => batch,
            };

            match batch {
                Ok(names) => {
                    errors = 0;
                    for name in names {
                        self.observe(&name);
                    }
                }
                Err(e) => {
                    errors += 1;
                    if errors > self.max_consecutive_errors {
                        error!(attempt = errors, error = %e, "Discovery keeps failing, giving up");
                        return Err(EngineError::DiscoveryExhausted {
                            errors,
                            last_error: e,
                        });
                    }
                    warn!(attempt = errors, error = %e, "Discovery read failed");

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.error_delay) => {}
                    }
                }
            }
        }
    }
}
