//! A time interface that can be replaced by a test implementation.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

//------------ Clock ---------------------------------------------------------

/// Source of monotonic time and delays for the protocol engine.
///
/// The engine measures how long sends and handshake attempts actually took
/// and sleeps out the remainder of failed attempts. Both go through this
/// trait so tests can drive the engine with a controlled clock.
pub trait Clock: Clone + Send + Sync {
    /// The type that implements the [Elapsed] trait.
    type Instant: Clone + Debug + Elapsed + Send + Sync;

    /// Create a new instance of the clock.
    fn new() -> Self;

    /// Record the current time in an [Self::Instant] object.
    fn now(&self) -> Self::Instant;

    /// Suspend the caller for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

//------------ Elapsed -------------------------------------------------------

/// Trait for reporting the time that has elapsed since the creation of an
/// instance object.
pub trait Elapsed {
    /// Return the elapsed time.
    fn elapsed(&self) -> Duration;
}

//------------ SystemClock ---------------------------------------------------

/// Implementation of the [Clock] trait on top of Tokio's time driver.
///
/// Under a paused test runtime (`tokio::time::pause`) both `now` and
/// `sleep` follow the virtual clock, which is what the timing tests rely
/// on.
#[derive(Clone, Debug)]
pub struct SystemClock {}

impl Clock for SystemClock {
    type Instant = Instant;

    fn new() -> Self {
        Self {}
    }

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

impl Elapsed for Instant {
    fn elapsed(&self) -> Duration {
        Instant::elapsed(self)
    }
}
