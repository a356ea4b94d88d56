//! Interpreting the two timestamps written around every frame.

use std::time::Duration;

/// Query written at top-of-pipe when the frame begins.
pub const QUERY_BEGIN: u32 = 0;

/// Query written at bottom-of-pipe when the frame ends.
pub const QUERY_END: u32 = 1;

/// Number of queries a frame resets and writes.
pub const QUERY_COUNT: u32 = 2;

/// Raw tick values read back from the query pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuTimestamps {
    /// Value of [`QUERY_BEGIN`].
    pub start: u64,
    /// Value of [`QUERY_END`].
    pub end: u64,
}

impl GpuTimestamps {
    /// Builds the pair from the query results in slot order.
    pub fn from_queries(results: [u64; QUERY_COUNT as usize]) -> Self {
        Self {
            start: results[QUERY_BEGIN as usize],
            end: results[QUERY_END as usize],
        }
    }

    /// GPU time spent between the two queries.
    ///
    /// `timestamp_period_ns` is the device's nanoseconds per tick. A wrapped or
    /// reordered pair yields zero.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use render_compute::GpuTimestamps;
    ///
    /// let ts = GpuTimestamps { start: 1_000, end: 3_500 };
    /// assert_eq!(ts.elapsed(2.0), Duration::from_nanos(5_000));
    /// ```
    pub fn elapsed(&self, timestamp_period_ns: f32) -> Duration {
        let ticks = self.end.saturating_sub(self.start);
        let nanos = ticks as f64 * f64::from(timestamp_period_ns);
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_scales_by_period() {
        let ts = GpuTimestamps::from_queries([100, 200]);
        assert_eq!(ts.elapsed(1.0), Duration::from_nanos(100));
        assert_eq!(ts.elapsed(0.5), Duration::from_nanos(50));
    }

    #[test]
    fn reordered_ticks_saturate() {
        let ts = GpuTimestamps { start: 50, end: 10 };
        assert_eq!(ts.elapsed(1.0), Duration::ZERO);
    }
}
