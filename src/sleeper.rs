//! Waiting out backoff holds.
//!
//! A retry-topic record that is not yet due is held by its partition worker. The wait goes
//! through a [`Sleeper`] so retry flows can be driven in tests without wall-clock delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Boxed future returned by [`Sleeper::sleep`].
pub type Hold = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Something that can wait out a backoff hold.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Hold;
}

/// Holds on the tokio timer. Used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Hold {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Releases every hold immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Hold {
        Box::pin(std::future::ready(()))
    }
}

/// Releases holds immediately and remembers how long each one asked for.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    holds: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested holds, oldest first.
    pub fn holds(&self) -> Vec<Duration> {
        self.log().clone()
    }

    /// Sum of every requested hold.
    pub fn total_held(&self) -> Duration {
        self.log().iter().sum()
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.holds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Hold {
        self.log().push(duration);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_runtime_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(250)).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn instant_sleeper_returns_at_once() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn tracking_sleeper_logs_holds_across_clones() {
        let sleeper = TrackingSleeper::new();
        let shared = sleeper.clone();
        sleeper.sleep(Duration::from_millis(100)).await;
        shared.sleep(Duration::from_millis(40)).await;

        assert_eq!(sleeper.holds(), vec![Duration::from_millis(100), Duration::from_millis(40)]);
        assert_eq!(shared.total_held(), Duration::from_millis(140));

        sleeper.clear();
        assert!(shared.holds().is_empty());
    }
}
