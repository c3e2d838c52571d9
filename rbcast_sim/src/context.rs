//! Simulation context implementing BroadcastContext for deterministic runs.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rbcast_env::BroadcastContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// - The clock only moves when the simulator advances it
/// - Link delays come from a ChaCha8 stream seeded from the run seed,
///   so the same seed always yields the same delivery schedule
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for link delays
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap();
        *time = time.saturating_add(nanos(duration));
    }

    /// Moves the clock forward to `at`. The clock never goes backwards.
    pub fn set_time(&self, at: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap();
        *time = (*time).max(nanos(at));
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
        }
    }
}

#[async_trait]
impl BroadcastContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(*self.virtual_time_ns.lock().unwrap())
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping in simulation just moves the virtual clock
        self.advance_time(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn sample_delay(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let sampled = self
            .rng
            .lock()
            .unwrap()
            .gen_range(nanos(min)..=nanos(max));
        Duration::from_nanos(sampled)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.set_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.set_time(Duration::from_millis(1500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_deterministic_delays() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);
        let (min, max) = (Duration::from_millis(10), Duration::from_millis(100));

        let a: Vec<Duration> = (0..20).map(|_| ctx1.sample_delay(min, max)).collect();
        let b: Vec<Duration> = (0..20).map(|_| ctx2.sample_delay(min, max)).collect();

        assert_eq!(a, b);
        assert!(a.iter().all(|d| *d >= min && *d <= max));
    }

    #[test]
    fn test_sim_context_time_saturates() {
        let ctx = SimContext::new(7);
        ctx.advance_time(Duration::MAX);
        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn test_sim_context_fixed_delay() {
        let ctx = SimContext::new(1);
        let delay = Duration::from_millis(25);
        assert_eq!(ctx.sample_delay(delay, delay), delay);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));
        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.seed(), 42);
    }
}
