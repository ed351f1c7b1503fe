//! Adaptive batch sizing.
//!
//! Every batch is timed twice: the wall-clock time of the whole round trip and the part of
//! it spent inside the databases. Their difference approximates network and encoding
//! overhead, and the next batch size is grown or shrunk to keep that overhead near one
//! second.

use std::time::Duration;

use tracing::warn;

use crate::error::TapsError;

/// Number of transport failures tolerated for a single batch before giving up.
pub const MAX_TRANSPORT_RETRIES: u32 = 2;

/// Batch size used after the first transport failure.
pub const FIRST_RETRY_CHUNKSIZE: usize = 10;

/// Batch size used after the second transport failure.
pub const SECOND_RETRY_CHUNKSIZE: usize = 1;

const SLOW_THRESHOLD: Duration = Duration::from_secs(3);
const HIGH_THRESHOLD: Duration = Duration::from_millis(1100);
const LOW_THRESHOLD: Duration = Duration::from_millis(800);
const STEP: usize = 100;

/// Computes the size of the next batch.
///
/// `elapsed` is the total round-trip time of the previous batch and `time_in_db` the part
/// of it spent in fetch and insert statements. When the batch needed retries the already
/// collapsed size is kept, so a flaky link does not immediately grow back.
pub fn next_chunksize(
    previous: usize,
    elapsed: Duration,
    time_in_db: Duration,
    retries: u32,
) -> usize {
    if retries > 0 {
        return previous.max(1);
    }

    let diff = elapsed.saturating_sub(time_in_db);
    let next = if diff > SLOW_THRESHOLD {
        previous.div_ceil(3)
    } else if diff > HIGH_THRESHOLD {
        previous.saturating_sub(STEP)
    } else if diff < LOW_THRESHOLD {
        previous.saturating_mul(2)
    } else {
        previous.saturating_add(STEP)
    };

    next.max(1)
}

/// Tracks the batch size and the transport failures of the batch currently in flight.
#[derive(Debug, Clone)]
pub struct ChunksizeController {
    chunksize: usize,
    retries: u32,
}

impl ChunksizeController {
    pub fn new(chunksize: usize) -> Self {
        Self {
            chunksize: chunksize.max(1),
            retries: 0,
        }
    }

    /// Size to use for the next attempt.
    pub fn chunksize(&self) -> usize {
        self.chunksize
    }

    /// Transport failures observed for the current batch so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Registers a transport failure and collapses the batch size.
    ///
    /// Returns the original error once the retry budget is exhausted.
    pub fn register_transport_failure(&mut self, err: TapsError) -> Result<usize, TapsError> {
        self.retries += 1;
        if self.retries > MAX_TRANSPORT_RETRIES {
            return Err(err);
        }

        self.chunksize = if self.retries == 1 {
            FIRST_RETRY_CHUNKSIZE
        } else {
            SECOND_RETRY_CHUNKSIZE
        };

        warn!(
            error = %err,
            retries = self.retries,
            chunksize = self.chunksize,
            "transport failure, retrying batch with a smaller chunksize"
        );

        Ok(self.chunksize)
    }

    /// Consumes the controller after a successful attempt and returns the next size.
    pub fn finish(self, elapsed: Duration, time_in_db: Duration) -> usize {
        next_chunksize(self.chunksize, elapsed, time_in_db, self.retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn fast_batches_double() {
        assert_eq!(next_chunksize(1000, secs(0.5), secs(0.1), 0), 2000);
    }

    #[test]
    fn comfortable_batches_grow_linearly() {
        assert_eq!(next_chunksize(1000, secs(1.0), secs(0.0), 0), 1100);
        assert_eq!(next_chunksize(1000, secs(0.8), secs(0.0), 0), 1100);
    }

    #[test]
    fn exactly_eleven_hundred_millis_still_grows() {
        assert_eq!(
            next_chunksize(1000, Duration::from_millis(1100), Duration::ZERO, 0),
            1100
        );
    }

    #[test]
    fn slow_batches_shrink() {
        assert_eq!(next_chunksize(1000, secs(2.0), secs(0.0), 0), 900);
        assert_eq!(next_chunksize(1000, secs(3.5), secs(0.0), 0), 334);
        assert_eq!(next_chunksize(50, secs(2.0), secs(0.0), 0), 1);
    }

    #[test]
    fn database_time_is_not_counted_as_overhead() {
        assert_eq!(next_chunksize(1000, secs(10.0), secs(9.5), 0), 2000);
    }

    #[test]
    fn retried_batches_keep_their_size() {
        assert_eq!(next_chunksize(10, secs(0.1), secs(0.0), 1), 10);
        assert_eq!(next_chunksize(1, secs(0.1), secs(0.0), 2), 1);
    }

    #[test]
    fn result_is_never_zero() {
        assert_eq!(next_chunksize(1, secs(5.0), secs(0.0), 0), 1);
        assert_eq!(next_chunksize(0, secs(0.1), secs(0.0), 0), 1);
    }

    #[test]
    fn transport_failures_collapse_then_give_up() {
        let failure = || TapsError::from((ErrorKind::TransportFailed, "boom"));
        let mut controller = ChunksizeController::new(1000);

        assert_eq!(controller.register_transport_failure(failure()), Ok(10));
        assert_eq!(controller.register_transport_failure(failure()), Ok(1));

        let err = controller.register_transport_failure(failure()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailed);
        assert_eq!(controller.retries(), 3);
    }

    #[test]
    fn success_after_retry_keeps_collapsed_size() {
        let mut controller = ChunksizeController::new(1000);
        controller
            .register_transport_failure(TapsError::from((ErrorKind::TransportFailed, "boom")))
            .unwrap();

        assert_eq!(controller.finish(secs(0.1), secs(0.0)), 10);
    }
}
