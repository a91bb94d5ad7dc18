//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness,
//! timers). Production code uses [`SystemEnv`]; tests use
//! [`testing::TestEnv`] with a controllable clock and seeded randomness, so
//! every timestamp check, rate window, and expiry sweep is reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and sleeping.
///
/// Implementations MUST guarantee:
///
/// - `now_unix_ms()` never goes backwards within one execution context
/// - `random_bytes()` is cryptographically secure in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in unix milliseconds.
    ///
    /// Protocol timestamps (handshake freshness, acks, message expiry, rate
    /// windows) are all wall-clock and wire-visible, so the environment
    /// exposes unix time rather than an opaque instant.
    fn now_unix_ms(&self) -> u64;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Sleep for `duration`. Only driver runtimes await this; protocol
    /// logic never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Convenience: a random fixed-size array.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        self.random_bytes(&mut out);
        out
    }
}

/// Production environment: system clock, OS CSPRNG, tokio timers.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now_unix_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as u64,
            // Pre-epoch system clocks do not occur on supported platforms;
            // saturate rather than panic if one ever does.
            Err(_) => 0,
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Deterministic environment for tests.
pub mod testing {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use super::Environment;

    /// Test environment with a manually advanced clock and a seeded,
    /// reproducible byte stream.
    #[derive(Debug, Clone)]
    pub struct TestEnv {
        now_ms: Arc<AtomicU64>,
        rng_state: Arc<Mutex<u64>>,
    }

    impl TestEnv {
        /// Create a test environment at the given wall-clock time.
        pub fn at(now_ms: u64) -> Self {
            Self {
                now_ms: Arc::new(AtomicU64::new(now_ms)),
                rng_state: Arc::new(Mutex::new(0x5EA1_1A2B_3C4D_5E6F)),
            }
        }

        /// Advance the clock by `delta_ms`.
        pub fn advance_ms(&self, delta_ms: u64) {
            self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
        }

        /// Set the clock to an absolute time.
        pub fn set_ms(&self, now_ms: u64) {
            self.now_ms.store(now_ms, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        fn now_unix_ms(&self) -> u64 {
            self.now_ms.load(Ordering::SeqCst)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // splitmix64: reproducible, well distributed, not secure —
            // exactly what deterministic tests want.
            let mut state = self.rng_state.lock().expect("rng mutex poisoned");
            for byte in buffer.iter_mut() {
                *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
                let mut z = *state;
                z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
                *byte = (z ^ (z >> 31)) as u8;
            }
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            // Virtual time: sleeping is a no-op; tests advance the clock.
            std::future::ready(())
        }
    }
}
