use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The keyed stream buffer factor must allow at least one full chunk to be buffered.
    #[error("`buffer_factor` must be at least 1.0, got {0}")]
    BufferFactorTooSmall(f64),
    /// The default chunk size cannot be zero.
    #[error("`default_chunksize` cannot be zero")]
    ChunksizeZero,
    /// The session idle timeout cannot be zero.
    #[error("`session.idle_timeout_secs` cannot be zero")]
    IdleTimeoutZero,
    /// The session sweep interval cannot be zero.
    #[error("`session.sweep_interval_secs` cannot be zero")]
    SweepIntervalZero,
    /// Sessions must outlive their pooled connections.
    #[error("`session.expire_after_secs` ({0}) is shorter than `session.idle_timeout_secs` ({1})")]
    ExpiryBeforeIdleTimeout(u64, u64),
}
