use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::models::session::SessionRecord;
use crate::services::session_cache::SessionCache;

/// Capacity of the check-requested channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Foreground state reported by the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPhase {
    Active,
    Inactive,
    Background,
}

/// What asked for a staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The app came back to the foreground.
    Foreground,
    /// A role-gated screen regained focus.
    ScreenFocus(String),
    /// The periodic timer fired.
    Timer,
}

/// Published before every staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequested {
    pub trigger: Trigger,
    pub at_ms: i64,
}

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The trigger did not warrant a check.
    Skipped,
    /// `SessionCache::get_current` ran and returned this.
    Checked(Option<SessionRecord>),
}

/// Decides when the session cache is asked to re-check staleness.
///
/// Never touches the network; the staleness decision belongs to the cache.
pub struct LifecycleMonitor {
    cache: SessionCache,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    phase: Mutex<AppPhase>,
    last_check_ms: AtomicI64,
    events: broadcast::Sender<CheckRequested>,
}

impl LifecycleMonitor {
    /// Creates a new `LifecycleMonitor`.
    ///
    /// # Arguments
    ///
    /// * `cache` - The cache to poke.
    /// * `clock` - Time source for the timer watermark.
    /// * `min_interval` - Minimum spacing between timer-driven checks.
    pub fn new(cache: SessionCache, clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cache,
            clock,
            min_interval,
            phase: Mutex::new(AppPhase::Active),
            last_check_ms: AtomicI64::new(i64::MIN),
            events,
        }
    }

    /// Subscribes to check requests.
    pub fn subscribe(&self) -> broadcast::Receiver<CheckRequested> {
        self.events.subscribe()
    }

    /// Records an app phase transition; checks on background/inactive to active.
    pub async fn on_app_phase(&self, next: AppPhase) -> CheckOutcome {
        let previous = {
            let mut phase = self.phase.lock().await;
            std::mem::replace(&mut *phase, next)
        };

        if previous != AppPhase::Active && next == AppPhase::Active {
            self.check(Trigger::Foreground).await
        } else {
            CheckOutcome::Skipped
        }
    }

    /// A role-gated screen regained focus.
    pub async fn on_screen_focus(&self, screen: &str) -> CheckOutcome {
        self.check(Trigger::ScreenFocus(screen.to_string())).await
    }

    /// The periodic timer fired; skipped if any check ran within `min_interval`.
    pub async fn on_timer_tick(&self) -> CheckOutcome {
        let now = self.clock.now_ms();
        let last = self.last_check_ms.load(Ordering::SeqCst);
        let min_interval_ms = self.min_interval.as_millis() as i64;

        if last != i64::MIN && now - last < min_interval_ms {
            tracing::trace!("Timer check skipped, last check {} ms ago", now - last);
            return CheckOutcome::Skipped;
        }

        self.check(Trigger::Timer).await
    }

    /// Starts the periodic timer; the first tick fires after one `period`.
    pub fn spawn_timer(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.on_timer_tick().await;
            }
        })
    }

    async fn check(&self, trigger: Trigger) -> CheckOutcome {
        let at_ms = self.clock.now_ms();
        self.last_check_ms.store(at_ms, Ordering::SeqCst);

        tracing::debug!("Staleness check requested by {:?}", trigger);
        let _ = self.events.send(CheckRequested { trigger, at_ms });

        CheckOutcome::Checked(self.cache.get_current().await)
    }
}
