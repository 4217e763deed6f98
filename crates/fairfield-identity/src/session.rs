//! Inactivity session guard
//!
//! Tracks the last user activity in the host store and moves the session
//! through three phases:
//!
//! ```text
//! Active ──(elapsed ≥ timeout − lead)──▶ WarningWindow ──(elapsed ≥ timeout)──▶ Expired
//!   ▲                                        │                                    │
//!   └───────── throttled activity ───────────┘                                    │
//!   └──────────────────────── touch() / extend() ─────────────────────────────────┘
//! ```
//!
//! The timeout callback fires once per expiry. Activity signals never revive
//! an expired session; only an explicit [`SessionGuard::touch`] or
//! [`SessionGuard::extend`] does.

use crate::store::{KeyValueStore, StoreError, LAST_ACTIVITY_KEY};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Inactivity before the session expires
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long before expiry the warning is shown
pub const WARNING_LEAD: Duration = Duration::from_secs(2 * 60);

/// How often the poller re-evaluates the session
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum spacing between activity-driven touches
pub const ACTIVITY_THROTTLE: Duration = Duration::from_secs(10);

/// Timing policy of a [`SessionGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub timeout: Duration,
    pub warning_lead: Duration,
    pub poll_interval: Duration,
    pub activity_throttle: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            timeout: SESSION_TIMEOUT,
            warning_lead: WARNING_LEAD,
            poll_interval: POLL_INTERVAL,
            activity_throttle: ACTIVITY_THROTTLE,
        }
    }
}

impl SessionPolicy {
    /// Reject timings a poller cannot run with
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.poll_interval.is_zero() {
            return Err(SessionError::InvalidPolicy(
                "poll interval must be non-zero".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SessionError::InvalidPolicy("timeout must be non-zero".into()));
        }
        if self.warning_lead >= self.timeout {
            return Err(SessionError::InvalidPolicy(format!(
                "warning lead {:?} must be shorter than timeout {:?}",
                self.warning_lead, self.timeout
            )));
        }
        Ok(())
    }
}

/// Errors from starting or driving a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Active,
    WarningWindow,
    Expired,
}

/// Snapshot published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Time left before expiry (zero once expired)
    pub remaining: Duration,
}

impl SessionState {
    /// State of a session that has just seen activity
    pub fn fresh(policy: &SessionPolicy) -> Self {
        Self {
            phase: SessionPhase::Active,
            remaining: policy.timeout,
        }
    }

    /// Not yet expired (warning window included)
    pub fn is_active(&self) -> bool {
        self.phase != SessionPhase::Expired
    }

    /// The "you are about to be logged out" prompt should be visible
    pub fn show_warning(&self) -> bool {
        self.phase == SessionPhase::WarningWindow
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::fresh(&SessionPolicy::default())
    }
}

/// Classify a session given the current time and the last activity
/// (both in milliseconds since the Unix epoch).
///
/// A missing timestamp counts as activity right now.
pub fn evaluate(policy: &SessionPolicy, now_ms: u64, last_activity_ms: Option<u64>) -> SessionState {
    let last = last_activity_ms.unwrap_or(now_ms);
    let elapsed = Duration::from_millis(now_ms.saturating_sub(last));

    if elapsed >= policy.timeout {
        SessionState {
            phase: SessionPhase::Expired,
            remaining: Duration::ZERO,
        }
    } else {
        let remaining = policy.timeout - elapsed;
        let phase = if remaining <= policy.warning_lead {
            SessionPhase::WarningWindow
        } else {
            SessionPhase::Active
        };
        SessionState { phase, remaining }
    }
}

/// Render a remaining duration as `"4m 5s"`, or `"45s"` under a minute
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Source of wall-clock time in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock moved by hand, for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Qualifying user activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Touch,
    Scroll,
}

impl ActivityKind {
    /// Map a DOM event name (`mousedown`, `keydown`, `touchstart`, `scroll`)
    pub fn from_dom_event(name: &str) -> Option<Self> {
        match name {
            "mousedown" => Some(Self::Pointer),
            "keydown" => Some(Self::Keyboard),
            "touchstart" => Some(Self::Touch),
            "scroll" => Some(Self::Scroll),
            _ => None,
        }
    }
}

/// Leading-edge throttle: the first call passes, then at most one per window
#[derive(Debug)]
struct Throttle {
    window_ms: u64,
    last_run: Option<u64>,
}

impl Throttle {
    fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            last_run: None,
        }
    }

    fn ready(&mut self, now_ms: u64) -> bool {
        match self.last_run {
            Some(last) if now_ms.saturating_sub(last) < self.window_ms => false,
            _ => {
                self.last_run = Some(now_ms);
                true
            }
        }
    }

    fn reset(&mut self) {
        self.last_run = None;
    }
}

type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

struct Poller {
    generation: u64,
    task: JoinHandle<()>,
}

struct GuardInner {
    on_timeout: Option<TimeoutCallback>,
    /// Set when the callback fired for the current expiry
    expiry_reported: bool,
    throttle: Throttle,
    poller: Option<Poller>,
    next_generation: u64,
}

/// Inactivity guard over a host store
pub struct SessionGuard {
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
    inner: Mutex<GuardInner>,
}

impl SessionGuard {
    pub fn new(policy: SessionPolicy, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(policy, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        policy: SessionPolicy,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::fresh(&policy));
        Self {
            policy,
            clock,
            store,
            state,
            inner: Mutex::new(GuardInner {
                on_timeout: None,
                expiry_reported: false,
                throttle: Throttle::new(policy.activity_throttle),
                poller: None,
                next_generation: 0,
            }),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Latest published state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Record activity now and return to `Active`, whatever the phase
    pub fn touch(&self) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        self.touch_locked(&mut inner)
    }

    /// Explicit "stay logged in"
    pub fn extend(&self) -> Result<(), StoreError> {
        self.touch()
    }

    /// Re-evaluate the session and publish the result.
    ///
    /// Entering `Expired` fires the timeout callback, once per expiry; any
    /// non-expired reading (including activity persisted by another writer
    /// of the same store) re-arms it. The callback runs after the guard's
    /// lock is released, so it may call back into the guard.
    pub fn check_timeout(&self) -> Result<SessionState, StoreError> {
        let (state, callback) = {
            let mut inner = self.lock_inner();
            self.evaluate_locked(&mut inner)?
        };
        self.fire(callback);
        Ok(state)
    }

    /// Handle a user activity signal.
    ///
    /// Throttled, and ignored once the session has expired. Returns whether
    /// the activity refreshed the session.
    pub fn record_activity(&self, kind: ActivityKind) -> Result<bool, StoreError> {
        let (refreshed, callback) = {
            let mut inner = self.lock_inner();
            let (state, callback) = self.evaluate_locked(&mut inner)?;
            let refreshed = if !state.is_active() {
                log::debug!("Ignoring {kind:?} activity on an expired session");
                false
            } else if inner.throttle.ready(self.clock.now_millis()) {
                self.touch_locked(&mut inner)?;
                true
            } else {
                false
            };
            (refreshed, callback)
        };
        self.fire(callback);
        Ok(refreshed)
    }

    /// Begin monitoring: touch, then poll every `poll_interval` on a tokio
    /// task until the returned handle is cancelled or [`stop`](Self::stop)
    /// is called. A previous poller is replaced.
    ///
    /// Must be called from within a tokio runtime. Fails without touching
    /// anything when the policy is unusable.
    pub fn start<F>(self: &Arc<Self>, on_timeout: F) -> Result<SessionHandle, SessionError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.policy.validate()?;
        self.touch()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock_inner();
        if let Some(previous) = inner.poller.take() {
            previous.task.abort();
        }
        inner.on_timeout = Some(Arc::new(on_timeout));
        inner.throttle.reset();

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let task = tokio::spawn(poll_loop(
            Arc::downgrade(self),
            rx,
            self.policy.poll_interval,
        ));
        inner.poller = Some(Poller { generation, task });
        drop(inner);

        log::debug!(
            "Session monitoring started (timeout {:?}, poll {:?})",
            self.policy.timeout,
            self.policy.poll_interval
        );
        Ok(SessionHandle {
            guard: Arc::downgrade(self),
            generation,
            activity: ActivitySender { tx },
            cancelled: false,
        })
    }

    /// Stop monitoring, drop the callback and reset to the initial state
    pub fn stop(&self) {
        {
            let mut inner = self.lock_inner();
            if let Some(poller) = inner.poller.take() {
                poller.task.abort();
            }
            inner.on_timeout = None;
            inner.expiry_reported = false;
            inner.throttle.reset();
        }
        self.state.send_replace(SessionState::fresh(&self.policy));
    }

    /// Whether a poller is currently running
    pub fn is_monitoring(&self) -> bool {
        self.lock_inner().poller.is_some()
    }

    /// Forget the persisted activity timestamp
    pub fn clear_activity(&self) -> Result<(), StoreError> {
        self.store.remove(LAST_ACTIVITY_KEY)
    }

    fn touch_locked(&self, inner: &mut GuardInner) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        self.store.set(LAST_ACTIVITY_KEY, &now.to_string())?;
        inner.expiry_reported = false;
        self.state.send_replace(SessionState::fresh(&self.policy));
        Ok(())
    }

    /// Evaluate and publish under the guard's lock, so a concurrent touch
    /// is never overwritten by a stale reading.
    fn evaluate_locked(
        &self,
        inner: &mut GuardInner,
    ) -> Result<(SessionState, Option<TimeoutCallback>), StoreError> {
        let now = self.clock.now_millis();
        let last = self.last_activity()?;
        let state = evaluate(&self.policy, now, last);

        let callback = if state.phase != SessionPhase::Expired {
            inner.expiry_reported = false;
            None
        } else if inner.expiry_reported {
            None
        } else {
            inner.expiry_reported = true;
            inner.on_timeout.clone()
        };

        self.state.send_replace(state);
        Ok((state, callback))
    }

    fn fire(&self, callback: Option<TimeoutCallback>) {
        if let Some(callback) = callback {
            log::info!("Session expired after {:?} of inactivity", self.policy.timeout);
            callback();
        }
    }

    fn cancel_poller(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if inner
            .poller
            .as_ref()
            .is_some_and(|p| p.generation == generation)
        {
            if let Some(poller) = inner.poller.take() {
                poller.task.abort();
            }
        }
    }

    /// Stored timestamp; an unreadable value counts as long ago, so the
    /// session fails closed.
    fn last_activity(&self) -> Result<Option<u64>, StoreError> {
        match self.store.get(LAST_ACTIVITY_KEY)? {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Ok(Some(ms)),
                Err(_) => {
                    log::warn!("Unreadable last-activity timestamp, treating session as expired");
                    Ok(Some(0))
                }
            },
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, GuardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn poll_loop(
    guard: Weak<SessionGuard>,
    mut activity: mpsc::UnboundedReceiver<ActivityKind>,
    period: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut activity_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(guard) = guard.upgrade() else { break };
                if let Err(e) = guard.check_timeout() {
                    log::warn!("Session check failed: {}", e);
                }
            }
            received = activity.recv(), if activity_open => {
                let Some(kind) = received else {
                    activity_open = false;
                    continue;
                };
                let Some(guard) = guard.upgrade() else { break };
                if let Err(e) = guard.record_activity(kind) {
                    log::warn!("Failed to record activity: {}", e);
                }
            }
        }
    }
}

/// Feeds host activity signals to a running poller
#[derive(Debug, Clone)]
pub struct ActivitySender {
    tx: mpsc::UnboundedSender<ActivityKind>,
}

impl ActivitySender {
    /// Queue an activity signal; false once monitoring has stopped
    pub fn notify(&self, kind: ActivityKind) -> bool {
        self.tx.send(kind).is_ok()
    }
}

/// Cleanup handle returned by [`SessionGuard::start`].
///
/// Cancelling stops this run's poller; it is idempotent and also happens on
/// drop.
#[derive(Debug)]
pub struct SessionHandle {
    guard: Weak<SessionGuard>,
    generation: u64,
    activity: ActivitySender,
    cancelled: bool,
}

impl SessionHandle {
    pub fn activity_sender(&self) -> ActivitySender {
        self.activity.clone()
    }

    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(guard) = self.guard.upgrade() {
            guard.cancel_poller(self.generation);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    const T0: u64 = 1_700_000_000_000;

    fn ms(d: Duration) -> u64 {
        d.as_millis() as u64
    }

    fn guard_at(start: u64) -> (Arc<SessionGuard>, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryStore::new());
        let guard = Arc::new(SessionGuard::with_clock(
            SessionPolicy::default(),
            store.clone(),
            clock.clone(),
        ));
        (guard, clock, store)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_evaluate_phases() {
        let policy = SessionPolicy::default();
        let timeout = ms(policy.timeout);
        let lead = ms(policy.warning_lead);

        let s = evaluate(&policy, T0, Some(T0));
        assert_eq!(s.phase, SessionPhase::Active);
        assert_eq!(s.remaining, policy.timeout);

        let s = evaluate(&policy, T0 + timeout - lead - 1, Some(T0));
        assert_eq!(s.phase, SessionPhase::Active);

        let s = evaluate(&policy, T0 + timeout - lead, Some(T0));
        assert_eq!(s.phase, SessionPhase::WarningWindow);
        assert!(s.is_active());
        assert!(s.show_warning());

        let s = evaluate(&policy, T0 + timeout - 1, Some(T0));
        assert_eq!(s.phase, SessionPhase::WarningWindow);

        let s = evaluate(&policy, T0 + timeout, Some(T0));
        assert_eq!(s.phase, SessionPhase::Expired);
        assert_eq!(s.remaining, Duration::ZERO);
        assert!(!s.is_active());
        assert!(!s.show_warning());
    }

    #[test]
    fn test_evaluate_missing_timestamp_is_fresh() {
        let policy = SessionPolicy::default();
        assert_eq!(evaluate(&policy, T0, None), SessionState::fresh(&policy));
    }

    #[test]
    fn test_evaluate_future_timestamp_is_fresh() {
        let policy = SessionPolicy::default();
        let s = evaluate(&policy, T0, Some(T0 + 5_000));
        assert_eq!(s.phase, SessionPhase::Active);
        assert_eq!(s.remaining, policy.timeout);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::from_secs(0)), "0s");
        assert_eq!(format_remaining(Duration::from_secs(45)), "45s");
        assert_eq!(format_remaining(Duration::from_secs(60)), "1m 0s");
        assert_eq!(format_remaining(Duration::from_millis(119_999)), "1m 59s");
        assert_eq!(format_remaining(SESSION_TIMEOUT), "30m 0s");
    }

    #[test]
    fn test_dom_event_mapping() {
        assert_eq!(
            ActivityKind::from_dom_event("mousedown"),
            Some(ActivityKind::Pointer)
        );
        assert_eq!(
            ActivityKind::from_dom_event("touchstart"),
            Some(ActivityKind::Touch)
        );
        assert_eq!(ActivityKind::from_dom_event("mousemove"), None);
    }

    #[test]
    fn test_touch_persists_timestamp() {
        let (guard, _clock, store) = guard_at(T0);
        guard.touch().unwrap();
        assert_eq!(
            store.get(LAST_ACTIVITY_KEY).unwrap().as_deref(),
            Some(T0.to_string().as_str())
        );
        assert_eq!(guard.state(), SessionState::fresh(guard.policy()));
    }

    #[test]
    fn test_one_second_before_and_after_timeout() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        guard.lock_inner().on_timeout = Some(Arc::new(callback));
        guard.touch().unwrap();

        clock.set(T0 + ms(SESSION_TIMEOUT) - 1_000);
        let state = guard.check_timeout().unwrap();
        assert!(state.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        clock.set(T0 + ms(SESSION_TIMEOUT) + 1_000);
        let state = guard.check_timeout().unwrap();
        assert_eq!(state.phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Repeated checks do not fire again
        clock.advance(Duration::from_secs(60));
        guard.check_timeout().unwrap();
        guard.check_timeout().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_fires_again_after_extend() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        guard.lock_inner().on_timeout = Some(Arc::new(callback));
        guard.touch().unwrap();

        clock.advance(SESSION_TIMEOUT);
        guard.check_timeout().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        guard.extend().unwrap();
        assert!(guard.state().is_active());

        clock.advance(SESSION_TIMEOUT);
        guard.check_timeout().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_activity_from_another_writer_rearms_callback() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::new());
        let first = SessionGuard::with_clock(SessionPolicy::default(), store.clone(), clock.clone());
        let second = SessionGuard::with_clock(SessionPolicy::default(), store, clock.clone());
        let (count, callback) = counter();
        first.lock_inner().on_timeout = Some(Arc::new(callback));
        first.touch().unwrap();

        clock.advance(SESSION_TIMEOUT);
        assert_eq!(first.check_timeout().unwrap().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The other guard refreshes the shared timestamp
        second.touch().unwrap();
        assert!(first.check_timeout().unwrap().is_active());

        clock.advance(SESSION_TIMEOUT);
        assert_eq!(first.check_timeout().unwrap().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_validation() {
        assert!(SessionPolicy::default().validate().is_ok());

        let zero_poll = SessionPolicy {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            zero_poll.validate(),
            Err(SessionError::InvalidPolicy(_))
        ));

        let lead_too_long = SessionPolicy {
            warning_lead: SESSION_TIMEOUT,
            ..Default::default()
        };
        assert!(lead_too_long.validate().is_err());

        let zero_timeout = SessionPolicy {
            timeout: Duration::ZERO,
            warning_lead: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_activity_leaves_warning_window() {
        let (guard, clock, _store) = guard_at(T0);
        guard.touch().unwrap();

        clock.advance(SESSION_TIMEOUT - WARNING_LEAD + Duration::from_secs(1));
        assert!(guard.check_timeout().unwrap().show_warning());

        assert!(guard.record_activity(ActivityKind::Keyboard).unwrap());
        let state = guard.state();
        assert_eq!(state.phase, SessionPhase::Active);
        assert_eq!(state.remaining, SESSION_TIMEOUT);
    }

    #[test]
    fn test_activity_is_throttled() {
        let (guard, clock, store) = guard_at(T0);
        guard.touch().unwrap();

        clock.advance(Duration::from_secs(1));
        assert!(guard.record_activity(ActivityKind::Pointer).unwrap());
        let first = store.get(LAST_ACTIVITY_KEY).unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(!guard.record_activity(ActivityKind::Pointer).unwrap());
        assert_eq!(store.get(LAST_ACTIVITY_KEY).unwrap(), first);

        clock.advance(Duration::from_secs(5));
        assert!(guard.record_activity(ActivityKind::Scroll).unwrap());
        assert_ne!(store.get(LAST_ACTIVITY_KEY).unwrap(), first);
    }

    #[test]
    fn test_activity_ignored_once_expired() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        guard.lock_inner().on_timeout = Some(Arc::new(callback));
        guard.touch().unwrap();

        clock.advance(SESSION_TIMEOUT + Duration::from_secs(1));
        // Expiry is detected by the activity itself
        assert!(!guard.record_activity(ActivityKind::Touch).unwrap());
        assert_eq!(guard.state().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!guard.record_activity(ActivityKind::Touch).unwrap());
        assert_eq!(guard.state().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_corrupt_timestamp_fails_closed() {
        let (guard, _clock, store) = guard_at(T0);
        store.set(LAST_ACTIVITY_KEY, "yesterday").unwrap();
        assert_eq!(guard.check_timeout().unwrap().phase, SessionPhase::Expired);
    }

    #[test]
    fn test_callback_may_reenter_guard() {
        let (guard, clock, _store) = guard_at(T0);
        let weak = Arc::downgrade(&guard);
        guard.lock_inner().on_timeout = Some(Arc::new(move || {
            if let Some(g) = weak.upgrade() {
                g.stop();
            }
        }));
        guard.touch().unwrap();

        clock.advance(SESSION_TIMEOUT);
        guard.check_timeout().unwrap();
        // stop() inside the callback reset the published state
        assert_eq!(guard.state(), SessionState::fresh(guard.policy()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_fires_once() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        let mut rx = guard.subscribe();

        let _handle = guard.start(callback).unwrap();
        assert!(guard.is_monitoring());
        rx.borrow_and_update();

        clock.set(T0 + ms(SESSION_TIMEOUT) - 1_000);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_active());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        clock.set(T0 + ms(SESSION_TIMEOUT) + 1_000);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Next poll: still expired, no second callback
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, SessionPhase::Expired);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_zero_poll_interval() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::new());
        let policy = SessionPolicy {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        let guard = Arc::new(SessionGuard::with_clock(policy, store.clone(), clock));

        let result = guard.start(|| {});
        assert!(matches!(result, Err(SessionError::InvalidPolicy(_))));
        assert!(!guard.is_monitoring());
        assert_eq!(store.get(LAST_ACTIVITY_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_channel_refreshes_session() {
        let (guard, clock, store) = guard_at(T0);
        let mut rx = guard.subscribe();
        let handle = guard.start(|| {}).unwrap();
        rx.borrow_and_update();

        clock.advance(Duration::from_secs(60));
        assert!(handle.activity_sender().notify(ActivityKind::Keyboard));
        rx.changed().await.unwrap();

        let expected = (T0 + 60_000).to_string();
        // The poller evaluates before touching, so wait for the touch itself
        while store.get(LAST_ACTIVITY_KEY).unwrap().as_deref() != Some(expected.as_str()) {
            rx.changed().await.unwrap();
        }
        assert_eq!(rx.borrow_and_update().remaining, SESSION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_polling() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        let mut handle = guard.start(callback).unwrap();

        handle.cancel();
        handle.cancel();
        assert!(!guard.is_monitoring());

        // No poll runs after cancellation
        clock.advance(SESSION_TIMEOUT * 2);
        time::sleep(POLL_INTERVAL * 3).await;
        assert!(guard.state().is_active());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_does_not_cancel_new_run() {
        let (guard, _clock, _store) = guard_at(T0);
        let first = guard.start(|| {}).unwrap();
        let _second = guard.start(|| {}).unwrap();
        drop(first);
        assert!(guard.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_state() {
        let (guard, clock, _store) = guard_at(T0);
        let (count, callback) = counter();
        let _handle = guard.start(callback).unwrap();

        clock.advance(SESSION_TIMEOUT - Duration::from_secs(30));
        guard.check_timeout().unwrap();
        assert!(guard.state().show_warning());

        guard.stop();
        assert!(!guard.is_monitoring());
        assert_eq!(guard.state(), SessionState::fresh(guard.policy()));

        // No callback registered any more
        clock.advance(SESSION_TIMEOUT);
        guard.check_timeout().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
