//! Ambient event-scheduler abstraction.
//!
//! spec.md §5 assumes "an ambient event scheduler ('schedule callback C at
//! absolute time T' and 'cancel pending event E') and an ambient clock";
//! every engine in this workspace is written against the [`EventScheduler`]
//! trait rather than calling `tokio::time` directly, so the whole protocol
//! core stays testable without a real runtime clock.
//!
//! Cancellation is best-effort (spec.md §5): a [`TimerHandle`] that is
//! cancelled after its callback has already started running does not, and
//! cannot, un-fire it. Callers store per-entity state (a dialogue's status,
//! a request's pending-children set) and re-check it at the top of the
//! callback, so a late fire is a harmless no-op rather than a correctness
//! bug.

use std::time::{Duration, Instant};

use rand::Rng;

/// A scheduled callback: owns whatever state it needs to re-validate itself
/// before acting.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled callback, returned by [`EventScheduler::schedule_at`].
pub struct TimerHandle {
    join: tokio::task::JoinHandle<()>,
}

impl TimerHandle {
    /// Best-effort cancellation; a no-op if the callback already ran.
    pub fn cancel(self) {
        self.join.abort();
    }
}

/// "Schedule callback C at absolute time T" / "cancel pending event E" / "now()".
pub trait EventScheduler: Send + Sync {
    /// Seconds elapsed since this scheduler was created.
    fn now(&self) -> f64;

    /// Run `callback` after `delay` has elapsed.
    fn schedule_at(&self, delay: Duration, callback: Callback) -> TimerHandle;
}

/// `tokio::time`-backed scheduler: every node in the simulation shares one,
/// so all per-node discrete-time clocks stay in lockstep with the runtime's
/// own clock.
pub struct TokioScheduler {
    start: Instant,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScheduler for TokioScheduler {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn schedule_at(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle { join }
    }
}

/// A uniformly random duration in `[min, max]`, used for the send jitter
/// mandated by spec.md §6 ("every outbound send MUST be delayed by a
/// uniform random value in `[MIN_JITTER, MAX_JITTER]` seconds").
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = max.saturating_sub(min);
    let r: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    min + Duration::from_secs_f64(span.as_secs_f64() * r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn schedule_at_runs_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let _handle = scheduler.schedule_at(
            Duration::from_millis(10),
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancel_before_fire_prevents_callback() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = scheduler.schedule_at(
            Duration::from_millis(50),
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let min = Duration::from_millis(1);
        let max = Duration::from_millis(10);
        for _ in 0..100 {
            let d = jitter(min, max);
            assert!(d >= min && d <= max);
        }
    }
}
