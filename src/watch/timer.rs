//! # Wake timers
//!
//! Module dedicated to the coalescing wake-timer pool. Many folders
//! may sleep on retry timers at once, but the underlying platform
//! usually offers a single cheap wake-up alarm. The pool maps all
//! outstanding timers onto one OS alarm armed for the nearest
//! trigger, and fires near-simultaneous timers together instead of
//! waking the device once per timer.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use tracing::{debug, trace};

use super::error::{Error, Result};

/// The minimum granularity of the pool. Timeouts must be strictly
/// greater than this, and triggers closer than this to each other are
/// considered simultaneous.
pub const PRECISION: Duration = Duration::from_secs(60);

/// The handler fired when a wake timer expires.
pub type WakeTimerHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The OS alarm seam.
///
/// The pool is the exclusive owner of the alarm: nothing else may arm
/// or cancel it. The embedder routes the platform alarm callback to
/// [`WakeTimerPool::process_due_timers`].
pub trait AlarmClock: Send + Sync {
    /// The current instant, also used for trigger computations so
    /// fake clocks stay consistent in tests.
    fn now(&self) -> Instant;

    /// Programs the alarm for the given instant, replacing any
    /// previously armed one.
    fn set(&self, at: Instant);

    /// Cancels the armed alarm, if any.
    fn cancel(&self);
}

/// Handle on one outstanding wake timer.
///
/// Consumed by [`WakeTimerPool::cancel`]; cancelling a timer that
/// already fired is a no-op.
#[derive(Debug)]
pub struct WakeTimer(u64);

struct TimerEntry {
    id: u64,
    trigger_at: Instant,
    handler: WakeTimerHandler,
}

struct PoolState {
    timers: Vec<TimerEntry>,
    armed_at: Option<Instant>,
    min_timeout: Option<Duration>,
    min_timeout_set_at: Option<Instant>,
    next_id: u64,
}

/// The coalescing wake-timer pool.
pub struct WakeTimerPool {
    alarm: Arc<dyn AlarmClock>,
    state: Mutex<PoolState>,
}

impl WakeTimerPool {
    /// Creates an empty pool on top of the given alarm.
    pub fn new(alarm: Arc<dyn AlarmClock>) -> Self {
        Self {
            alarm,
            state: Mutex::new(PoolState {
                timers: Vec::new(),
                armed_at: None,
                min_timeout: None,
                min_timeout_set_at: None,
                next_id: 0,
            }),
        }
    }

    /// Starts a timer firing the given handler after the given
    /// timeout.
    ///
    /// Timeouts not strictly greater than [`PRECISION`] are rejected:
    /// callers wanting a faster reaction should not go through an OS
    /// alarm at all. The alarm is only reprogrammed when none is
    /// armed or when the new trigger precedes the armed one by more
    /// than [`PRECISION`], to avoid alarm churn on near-simultaneous
    /// requests.
    pub fn start_timer(&self, timeout: Duration, handler: WakeTimerHandler) -> Result<WakeTimer> {
        if timeout <= PRECISION {
            return Err(Error::TimerTooShortError(timeout, PRECISION));
        }

        let now = self.alarm.now();
        let trigger_at = now + timeout;
        let mut state = self.state.lock().unwrap();

        // Rolling estimate of the smallest requested timeout, used to
        // decide which timers are close enough to fire together. The
        // estimate resets when no update happened within twice its
        // own value.
        let stale = match (state.min_timeout, state.min_timeout_set_at) {
            (Some(min_timeout), Some(set_at)) => now.duration_since(set_at) > min_timeout * 2,
            _ => true,
        };
        if stale || state.min_timeout.is_some_and(|min_timeout| timeout < min_timeout) {
            trace!("updating minimum wake timeout estimate to {timeout:?}");
            state.min_timeout = Some(timeout);
            state.min_timeout_set_at = Some(now);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.timers.push(TimerEntry {
            id,
            trigger_at,
            handler,
        });

        let rearm = match state.armed_at {
            None => true,
            Some(armed_at) => trigger_at + PRECISION < armed_at,
        };
        if rearm {
            debug!("arming wake alarm in {:?}", trigger_at - now);
            self.alarm.set(trigger_at);
            state.armed_at = Some(trigger_at);
        }

        Ok(WakeTimer(id))
    }

    /// Cancels the given timer.
    ///
    /// Cancelling a timer that already fired is a no-op. Cancelling
    /// the last outstanding timer cancels the OS alarm.
    pub fn cancel(&self, timer: WakeTimer) {
        let mut state = self.state.lock().unwrap();

        let len = state.timers.len();
        state.timers.retain(|entry| entry.id != timer.0);
        if state.timers.len() == len {
            trace!("wake timer already fired or cancelled");
            return;
        }

        if state.timers.is_empty() && state.armed_at.take().is_some() {
            debug!("cancelling wake alarm, no timer left");
            self.alarm.cancel();
        }
    }

    /// Fires every due timer and rearms the alarm for the nearest
    /// remaining one.
    ///
    /// To be invoked by the embedder whenever the OS alarm fires. A
    /// timer is due when its trigger falls before the next natural
    /// wake-up (`now + min_timeout - PRECISION`): waking once for the
    /// whole batch beats rescheduling each of them individually.
    pub async fn process_due_timers(&self) {
        let due = {
            let mut state = self.state.lock().unwrap();
            let now = self.alarm.now();
            let coalesce_until = now + state.min_timeout.unwrap_or(PRECISION) - PRECISION;

            let mut due = Vec::new();
            let mut pending = Vec::new();
            for entry in state.timers.drain(..) {
                if entry.trigger_at <= coalesce_until {
                    due.push(entry.handler);
                } else {
                    pending.push(entry);
                }
            }
            state.timers = pending;

            state.armed_at = state.timers.iter().map(|entry| entry.trigger_at).min();
            if let Some(nearest) = state.armed_at {
                self.alarm.set(nearest);
            }

            debug!(
                "firing {} wake timer(s), {} still pending",
                due.len(),
                state.timers.len()
            );
            due
        };

        for handler in due {
            handler().await;
        }
    }

    /// Cancels the armed alarm and immediately runs the coalescing
    /// check.
    ///
    /// Used when an external signal makes it likely that several
    /// timers should re-arm together, typically after a successful
    /// push.
    pub async fn reset_timers(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.armed_at.take().is_some() {
                debug!("cancelling wake alarm before reset");
                self.alarm.cancel();
            }
        }

        self.process_due_timers().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;

    struct FakeAlarm {
        start: Instant,
        offset: Mutex<Duration>,
        armed: Mutex<Vec<Instant>>,
        cancelled: AtomicUsize,
    }

    impl FakeAlarm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                armed: Mutex::new(Vec::new()),
                cancelled: AtomicUsize::new(0),
            })
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }

        fn armed_count(&self) -> usize {
            self.armed.lock().unwrap().len()
        }
    }

    impl AlarmClock for FakeAlarm {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }

        fn set(&self, at: Instant) {
            self.armed.lock().unwrap().push(at);
        }

        fn cancel(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> WakeTimerHandler {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    fn noop_handler() -> WakeTimerHandler {
        Arc::new(|| async {}.boxed())
    }

    #[test]
    fn rejects_timeouts_within_granularity() {
        let pool = WakeTimerPool::new(FakeAlarm::new());

        assert!(pool.start_timer(Duration::from_secs(30), noop_handler()).is_err());
        assert!(pool.start_timer(PRECISION, noop_handler()).is_err());
        assert!(pool.start_timer(Duration::from_secs(61), noop_handler()).is_ok());
    }

    #[test]
    fn near_simultaneous_timers_share_one_alarm() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());

        pool.start_timer(Duration::from_secs(300), noop_handler()).unwrap();
        pool.start_timer(Duration::from_secs(330), noop_handler()).unwrap();
        pool.start_timer(Duration::from_secs(290), noop_handler()).unwrap();

        // one alarm only: the later trigger never rearms, the earlier
        // one is within the granularity of the armed trigger
        assert_eq!(alarm.armed_count(), 1);
    }

    #[test]
    fn earlier_trigger_rearms_the_alarm() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());

        pool.start_timer(Duration::from_secs(3600), noop_handler()).unwrap();
        pool.start_timer(Duration::from_secs(300), noop_handler()).unwrap();

        assert_eq!(alarm.armed_count(), 2);
    }

    #[test]
    fn cancelling_last_timer_cancels_the_alarm() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());

        let timer = pool.start_timer(Duration::from_secs(300), noop_handler()).unwrap();
        pool.cancel(timer);

        assert_eq!(alarm.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn due_timers_fire_together() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        pool.start_timer(Duration::from_secs(300), counting_handler(fired.clone()))
            .unwrap();
        pool.start_timer(Duration::from_secs(320), counting_handler(fired.clone()))
            .unwrap();
        pool.start_timer(Duration::from_secs(3600), counting_handler(fired.clone()))
            .unwrap();

        alarm.advance(Duration::from_secs(300));
        pool.process_due_timers().await;

        // the 320s timer is within the coalescing window of the 300s
        // wake-up, the one-hour timer is not
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        alarm.advance(Duration::from_secs(3300));
        pool.process_due_timers().await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reset_runs_the_coalescing_check_immediately() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        pool.start_timer(Duration::from_secs(300), counting_handler(fired.clone()))
            .unwrap();

        // a reset slightly before the trigger still fires the timer:
        // it falls within the coalescing window of the next wake
        alarm.advance(Duration::from_secs(290));
        pool.reset_timers().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(alarm.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fired_timer_cancellation_is_a_noop() {
        let alarm = FakeAlarm::new();
        let pool = WakeTimerPool::new(alarm.clone());

        let timer = pool.start_timer(Duration::from_secs(300), noop_handler()).unwrap();
        alarm.advance(Duration::from_secs(300));
        pool.process_due_timers().await;

        pool.cancel(timer);
        assert_eq!(alarm.cancelled.load(Ordering::SeqCst), 0);
    }
}
