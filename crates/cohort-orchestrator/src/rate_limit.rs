use async_trait::async_trait;
use cohort_core::{AgentResponse, AgentRunOptions, Collaborator, CohortError, CohortResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct Bucket {
    tokens: u32,
    window_start: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    timer_armed: bool,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    capacity: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl Inner {
    /// Replenish for every whole interval since the window started, then hand
    /// tokens to queued callers in arrival order.
    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.window_start);
        if elapsed >= self.interval {
            let windows = elapsed.as_nanos() / self.interval.as_nanos().max(1);
            let added = u32::try_from(windows)
                .unwrap_or(u32::MAX)
                .saturating_mul(self.capacity);
            bucket.tokens = bucket.tokens.saturating_add(added).min(self.capacity);
            bucket.window_start = match u32::try_from(windows) {
                Ok(n) => bucket.window_start + self.interval * n,
                Err(_) => now,
            };
        }

        while bucket.tokens > 0 {
            let Some(waiter) = bucket.waiters.pop_front() else {
                break;
            };
            // A waiter whose caller went away does not consume a token.
            if waiter.send(()).is_ok() {
                bucket.tokens -= 1;
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.bucket.get_mut().timer.take() {
            timer.abort();
        }
    }
}

/// Token-bucket throttle shared by every collaborator call in a run.
///
/// Holds `capacity` tokens per fixed `interval`. Callers that find the bucket
/// empty queue up and are served strictly in arrival order, either by a later
/// call that notices the window rolled over or by a timer armed for the next
/// window boundary.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a limiter with `capacity` tokens per `interval`.
    /// A zero capacity is treated as one.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                interval,
                bucket: Mutex::new(Bucket {
                    tokens: capacity,
                    window_start: Instant::now(),
                    waiters: VecDeque::new(),
                    timer_armed: false,
                    timer: None,
                    closed: false,
                }),
            }),
        }
    }

    /// `capacity` calls per second.
    pub fn per_second(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1))
    }

    /// `capacity` calls per minute.
    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    /// Tokens granted per interval.
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Length of one refill window.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Suspend until a token is available, then consume it.
    ///
    /// Returns [`CohortError::RateLimiterClosed`] if the limiter is closed
    /// before this caller is served.
    pub async fn wait_for_token(&self) -> CohortResult<()> {
        let rx = {
            let mut bucket = self.inner.bucket.lock();
            if bucket.closed {
                return Err(CohortError::RateLimiterClosed);
            }
            self.inner.refill(&mut bucket, Instant::now());
            if bucket.waiters.is_empty() && bucket.tokens > 0 {
                bucket.tokens -= 1;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            bucket.waiters.push_back(tx);
            debug!(queued = bucket.waiters.len(), "Rate limiter: caller queued");
            self.arm_timer(&mut bucket);
            rx
        };
        rx.await.map_err(|_| CohortError::RateLimiterClosed)
    }

    /// Take a token only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.bucket.lock();
        if bucket.closed {
            return false;
        }
        self.inner.refill(&mut bucket, Instant::now());
        if bucket.waiters.is_empty() && bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens left in the current window.
    pub fn tokens_remaining(&self) -> u32 {
        let mut bucket = self.inner.bucket.lock();
        self.inner.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Number of callers currently queued.
    pub fn waiting(&self) -> usize {
        self.inner.bucket.lock().waiters.len()
    }

    /// Stop the timer and release every queued caller with an error.
    pub fn close(&self) {
        let mut bucket = self.inner.bucket.lock();
        bucket.closed = true;
        bucket.timer_armed = false;
        if let Some(timer) = bucket.timer.take() {
            timer.abort();
        }
        let released = bucket.waiters.len();
        bucket.waiters.clear();
        if released > 0 {
            debug!(released, "Rate limiter closed with queued callers");
        }
    }

    /// True once [`RateLimiter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.bucket.lock().closed
    }

    fn arm_timer(&self, bucket: &mut Bucket) {
        if bucket.timer_armed {
            return;
        }
        bucket.timer_armed = true;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        bucket.timer = Some(tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(inner) = weak.upgrade() else { return };
                    let mut bucket = inner.bucket.lock();
                    if bucket.waiters.is_empty() || bucket.closed {
                        bucket.timer_armed = false;
                        return;
                    }
                    bucket.window_start + inner.interval
                };
                tokio::time::sleep_until(deadline).await;
                let Some(inner) = weak.upgrade() else { return };
                let mut bucket = inner.bucket.lock();
                inner.refill(&mut bucket, Instant::now());
            }
        }));
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.inner.capacity)
            .field("interval", &self.inner.interval)
            .finish()
    }
}

/// A collaborator whose every call first waits on a shared [`RateLimiter`].
pub struct Throttled {
    inner: Arc<dyn Collaborator>,
    limiter: Option<RateLimiter>,
}

impl Throttled {
    /// Wrap `inner`. With no limiter calls go straight through.
    pub fn new(inner: Arc<dyn Collaborator>, limiter: Option<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// The undecorated collaborator.
    pub fn inner(&self) -> &Arc<dyn Collaborator> {
        &self.inner
    }
}

#[async_trait]
impl Collaborator for Throttled {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn has_tools(&self) -> bool {
        self.inner.has_tools()
    }

    async fn run(&self, input: &str, options: &AgentRunOptions) -> CohortResult<AgentResponse> {
        if let Some(limiter) = &self.limiter {
            limiter.wait_for_token().await?;
        }
        self.inner.run(input, options).await
    }

    async fn reset_conversation(&self) {
        self.inner.reset_conversation().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.tokens_remaining(), 0);
    }

    #[tokio::test]
    async fn test_immediate_token_does_not_queue() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.wait_for_token().await.unwrap();
        assert_eq!(limiter.tokens_remaining(), 1);
        assert_eq!(limiter.waiting(), 0);
    }

    #[tokio::test]
    async fn test_replenishes_after_interval() {
        let limiter = RateLimiter::new(1, Duration::from_millis(40));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_queued_callers_served_in_arrival_order() {
        let limiter = RateLimiter::new(1, Duration::from_millis(25));
        let order = Arc::new(Mutex::new(Vec::new()));

        let calls = (0..4).map(|i| {
            let limiter = limiter.clone();
            let order = Arc::clone(&order);
            async move {
                limiter.wait_for_token().await.unwrap();
                order.lock().push(i);
            }
        });
        join_all(calls).await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let limiter = RateLimiter::new(1, Duration::from_secs(3600));
        limiter.wait_for_token().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait_for_token().await })
        };
        while limiter.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        limiter.close();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(CohortError::RateLimiterClosed)));
        assert!(limiter.is_closed());
        assert!(limiter.wait_for_token().await.is_err());
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Collaborator for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn has_tools(&self) -> bool {
            true
        }

        async fn run(&self, input: &str, _options: &AgentRunOptions) -> CohortResult<AgentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AgentResponse::text(format!("ok: {input}")))
        }
    }

    #[tokio::test]
    async fn test_throttled_consumes_tokens() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let throttled = Throttled::new(inner.clone(), Some(limiter.clone()));

        assert_eq!(throttled.name(), "counting");
        assert!(throttled.has_tools());
        let resp = throttled.run("ping", &AgentRunOptions::default()).await.unwrap();
        assert_eq!(resp.output, "ok: ping");
        assert_eq!(limiter.tokens_remaining(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttled_without_limiter_passes_through() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let throttled = Throttled::new(inner.clone(), None);
        for _ in 0..10 {
            throttled.run("x", &AgentRunOptions::default()).await.unwrap();
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 10);
    }
}
