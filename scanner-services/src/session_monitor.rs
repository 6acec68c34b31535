//! Session transition watcher
//!
//! Polls the session calendar and, when the active trading session changes,
//! forces an out-of-band refresh on every broadcast loop so weights and
//! labels flip promptly rather than at each loop's next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use scanner_core::SessionClock;

use crate::scheduler::ChannelScheduler;

const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);

/// Source of the currently active session name and weight.
pub trait SessionSource: Send + Sync + 'static {
    fn current(&self) -> (String, f64);
}

impl SessionSource for SessionClock {
    fn current(&self) -> (String, f64) {
        self.current_session()
    }
}

pub struct SessionMonitor {
    source: Arc<dyn SessionSource>,
    scheduler: ChannelScheduler,
    poll_period: Duration,
}

impl SessionMonitor {
    pub fn new(source: Arc<dyn SessionSource>, scheduler: ChannelScheduler) -> Self {
        Self {
            source,
            scheduler,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }

    pub fn with_poll_period(mut self, poll_period: Duration) -> Self {
        self.poll_period = poll_period;
        self
    }

    /// Run forever. Intended to be spawned.
    pub async fn run(self) {
        // Prime before polling so startup is never mistaken for a
        // transition.
        let (mut last_session, _) = self.source.current();
        info!("Session monitor started in session {}", last_session);

        loop {
            sleep(self.poll_period).await;

            let (session, weight) = self.source.current();
            if session != last_session {
                info!(
                    "Session transition {} -> {} (weight {})",
                    last_session, session, weight
                );
                last_session = session;
                self.scheduler.refresh_all().await;
            }
        }
    }
}
