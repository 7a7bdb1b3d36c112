use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Limiter
///
/// The admission contract invoked once per inbound request, keyed by the client
/// address. Implementations never fail: they only allow or deny, and on denial
/// report how long the client should wait before retrying.
pub trait Limiter: Send + Sync {
    fn allow(&self, key: &str) -> (bool, Duration);
}

/// LimiterState
///
/// The concrete type used to share the admission controller across the application state.
pub type LimiterState = Arc<dyn Limiter>;

/// RateLimiterConfig
///
/// `requests_per_window` requests are admitted per client key in each `window`.
/// When `enabled` is false every request is admitted.
#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    pub requests_per_window: u32,
    pub window: Duration,
    pub enabled: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 20,
            window: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Shortest window the limiter will run with.
pub const MIN_WINDOW: Duration = Duration::from_secs(1);

/// Clock
///
/// Monotonic time source. Production uses `SystemClock`; tests drive a `ManualClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// ManualClock
///
/// A clock that only moves when told to. Clones share the same offset.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.origin + offset
    }
}

/// ClientWindow
///
/// Requests admitted for one key in the currently open window.
/// A key missing from the table is equivalent to `count == 0`.
#[derive(Clone, Copy, Debug)]
pub struct ClientWindow {
    pub count: u32,
    pub expires_at: Instant,
}

/// FixedWindowRateLimiter
///
/// Fixed-window counter per client key. The first request from a key opens a
/// window of `config.window`; once it expires the key is dropped entirely and
/// the next request starts from zero. Bursts straddling a window boundary can
/// therefore admit up to twice the nominal limit.
///
/// All access to the table goes through a single mutex. The critical section
/// is a map lookup and an increment, and is never held across an `.await`.
/// Expired windows are dropped lazily on the next access to their key and
/// eagerly by `purge_expired`, which `spawn_sweeper` runs on an interval.
pub struct FixedWindowRateLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// A zero `window` would expire every entry on creation and admit everything,
    /// so it is raised to `MIN_WINDOW`.
    pub fn with_clock(mut config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        if config.window < MIN_WINDOW {
            tracing::warn!(
                configured = ?config.window,
                "rate limiter window below {:?}; using the minimum",
                MIN_WINDOW
            );
            config.window = MIN_WINDOW;
        }
        Self {
            clients: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    // A poisoned lock only means another request panicked mid-increment;
    // the counters themselves are still valid.
    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientWindow>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Drops every window that has expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|_, window| window.expires_at > now);
        before - clients.len()
    }

    /// Number of keys with an open window.
    pub fn tracked_keys(&self) -> usize {
        self.clients().len()
    }

    /// spawn_sweeper
    ///
    /// Runs `purge_expired` every `window` on the tokio runtime, independently of
    /// request handling. The task ends when the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        let period = self.config.window.max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired rate limiter windows removed");
                }
            }
        })
    }
}

impl Limiter for FixedWindowRateLimiter {
    fn allow(&self, key: &str) -> (bool, Duration) {
        if !self.config.enabled {
            return (true, Duration::ZERO);
        }

        let now = self.clock.now();
        let mut clients = self.clients();

        match clients.get_mut(key) {
            Some(window) if window.expires_at > now => {
                if window.count < self.config.requests_per_window {
                    window.count += 1;
                    (true, Duration::ZERO)
                } else {
                    tracing::debug!(client = key, "rate limit exceeded");
                    (false, self.config.window)
                }
            }
            _ => {
                if self.config.requests_per_window == 0 {
                    return (false, self.config.window);
                }
                // New key, or its window elapsed: open a fresh window.
                clients.insert(
                    key.to_string(),
                    ClientWindow {
                        count: 1,
                        expires_at: now + self.config.window,
                    },
                );
                (true, Duration::ZERO)
            }
        }
    }
}
