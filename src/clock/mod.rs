use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::time::Duration;

/// Time source injected into every poll loop.
///
/// All waiting in the pipeline is synchronous blocking sleep; abstracting it
/// lets tests drive state transitions with zero real delay.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeping.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(feature = "mock")]
pub use manual::ManualClock;

#[cfg(feature = "mock")]
mod manual {
    use super::Clock;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Test clock: `sleep` returns immediately, advancing a virtual `now`.
    pub struct ManualClock {
        now: Mutex<NaiveDateTime>,
        slept_secs: AtomicU64,
    }

    impl ManualClock {
        pub fn starting_at(now: NaiveDateTime) -> Self {
            Self {
                now: Mutex::new(now),
                slept_secs: AtomicU64::new(0),
            }
        }

        /// Total virtual seconds slept so far.
        pub fn slept_secs(&self) -> u64 {
            self.slept_secs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let secs = duration.as_secs();
            self.slept_secs.fetch_add(secs, Ordering::SeqCst);
            let mut now = self.now.lock().unwrap();
            *now = *now + chrono::Duration::seconds(secs as i64);
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let start = NaiveDate::from_ymd_opt(2020, 2, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = ManualClock::starting_at(start);

        clock.sleep(Duration::from_secs(120)).await;
        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.slept_secs(), 125);
        assert_eq!(clock.now(), start + chrono::Duration::seconds(125));
    }
}
