use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Clock is the only source of "now" and of sleeping for coordination code. Timestamps are wall
/// clock (UTC) because they're compared across nodes through the shared store.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep_until(&mut self, deadline: DateTime<Utc>);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + to_chrono(duration);
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&mut self, deadline: DateTime<Utc>) {
        // Negative remainder means the deadline already passed.
        if let Ok(remaining) = (deadline - self.now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
        + chrono::Duration::nanoseconds(duration.subsec_nanos() as i64 % 1_000_000)
}

/// Sleep for `duration` unless `cancel` fires first. Returns true if cancelled.
pub(crate) async fn sleep_or_cancelled<C: Clock>(
    clock: &mut C,
    duration: Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = clock.sleep(duration) => false,
    }
}

pub fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Utc::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

/// MockClock only moves when its `MockClockController` advances it.
#[derive(Clone)]
pub struct MockClock {
    current_time: watch::Receiver<DateTime<Utc>>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: DateTime<Utc>) {
        loop {
            if *self.current_time.borrow() >= deadline {
                return;
            }

            if self.current_time.changed().await.is_err() {
                // Controller dropped, time will never advance again.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct MockClockController {
    current_time: watch::Sender<DateTime<Utc>>,
    time_of_instantiation: DateTime<Utc>,
}

impl MockClockController {
    pub fn current_time(&self) -> DateTime<Utc> {
        *self.current_time.borrow()
    }

    pub fn elapsed_time(&self) -> Duration {
        (self.current_time() - self.time_of_instantiation)
            .to_std()
            .unwrap_or_default()
    }

    /// Same caveat as any mock timer: advance in steps much smaller than the granularity you wish
    /// to observe. A sleeper woken by a large leap only learns that its deadline has passed.
    pub fn advance(&mut self, duration: Duration) {
        let new_now = self.current_time() + to_chrono(duration);
        self.current_time.send_replace(new_now);
    }
}
