//! Cancellation and timer primitives shared by the controllers.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identity of one chat request slot. Compared by equality to detect staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`Generation`]s, owned by one controller.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    last: u64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self) -> Generation {
        self.last += 1;
        Generation(self.last)
    }

    /// Whether `generation` is the most recent one handed out.
    pub fn is_latest(&self, generation: Generation) -> bool {
        self.last == generation.0
    }
}

/// Sleep for `duration` unless `token` fires first. Returns true if the full
/// duration elapsed.
pub async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeilingOutcome<T> {
    Finished(T),
    Elapsed,
    Cancelled,
}

/// Run `fut` bounded by a hard ceiling and a cancellation token, whichever
/// comes first. The future is dropped when either fires.
pub async fn run_with_ceiling<F>(
    ceiling: Duration,
    token: &CancellationToken,
    fut: F,
) -> CeilingOutcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => CeilingOutcome::Cancelled,
        result = tokio::time::timeout(ceiling, fut) => match result {
            Ok(value) => CeilingOutcome::Finished(value),
            Err(_) => CeilingOutcome::Elapsed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn generations_are_monotonic() {
        let mut counter = GenerationCounter::new();
        let a = counter.advance();
        let b = counter.advance();
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(a.get(), 1);
        assert_eq!(b.to_string(), "2");
        assert!(counter.is_latest(b));
        assert!(!counter.is_latest(a));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(sleep_or_cancelled(&token, Duration::from_millis(1500)).await);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(!sleep_or_cancelled(&token, Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_outcomes() {
        let token = CancellationToken::new();

        let done = run_with_ceiling(Duration::from_secs(5), &token, async { 7 }).await;
        assert_eq!(done, CeilingOutcome::Finished(7));

        let elapsed = run_with_ceiling(
            Duration::from_secs(5),
            &token,
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(elapsed, CeilingOutcome::Elapsed);

        token.cancel();
        let cancelled = run_with_ceiling(Duration::from_secs(5), &token, async { 1 }).await;
        assert_eq!(cancelled, CeilingOutcome::Cancelled);
    }
}
