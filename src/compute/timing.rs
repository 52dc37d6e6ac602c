//! Double-buffered timestamp queries for compute pass timing

use crate::backend::*;
use crate::error::GraphicsResult;

/// Query slots per pool: one frame-start marker, one start marker per timed
/// pipeline and one end-of-chain marker.
pub const TIMESTAMP_QUERY_CAPACITY: u32 = 64;

/// Highest query index a pipeline can be timed at.
pub const MAX_TIMED_PIPELINES: u32 = TIMESTAMP_QUERY_CAPACITY - 2;

/// Milliseconds between two resolved timestamps, or 0 if either is unresolved.
pub fn elapsed_ms(start: TimestampQuery, end: TimestampQuery, period_ns: f32) -> f32 {
    if !(start.available && end.available) {
        return 0.0;
    }
    (end.ticks.saturating_sub(start.ticks) as f64 * period_ns as f64 / 1_000_000.0) as f32
}

/// Two timestamp pools used on alternate frames.
///
/// A frame writes into one pool while the other one, written the frame
/// before, is read back without waiting.
#[derive(Debug)]
pub struct TimestampPools {
    pools: [QueryPoolHandle; 2],
    current: usize,
    period_ns: f32,
}

impl TimestampPools {
    pub fn new(backend: &mut dyn GpuBackend, period_ns: f32) -> GraphicsResult<Self> {
        let first = backend.create_timestamp_pool(TIMESTAMP_QUERY_CAPACITY)?;
        let second = match backend.create_timestamp_pool(TIMESTAMP_QUERY_CAPACITY) {
            Ok(pool) => pool,
            Err(e) => {
                backend.destroy_query_pool(first);
                return Err(e.into());
            }
        };
        for pool in [first, second] {
            backend.reset_query_pool(pool, 0, TIMESTAMP_QUERY_CAPACITY);
        }
        Ok(Self {
            pools: [first, second],
            current: 0,
            period_ns,
        })
    }

    /// Pool the frame being recorded writes into.
    pub fn current(&self) -> QueryPoolHandle {
        self.pools[self.current]
    }

    pub fn period_ns(&self) -> f32 {
        self.period_ns
    }

    /// Read the first `count` slots of the pool written last frame.
    pub fn read_previous(
        &self,
        backend: &mut dyn GpuBackend,
        count: u32,
    ) -> GraphicsResult<Vec<TimestampQuery>> {
        let previous = self.pools[1 - self.current];
        Ok(backend.timestamp_results(previous, 0, count.min(TIMESTAMP_QUERY_CAPACITY))?)
    }

    /// Reset the current pool and mark the start of the frame at slot 0.
    pub fn begin(&self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle) {
        let pool = self.current();
        backend.reset_query_pool(pool, 0, TIMESTAMP_QUERY_CAPACITY);
        backend.cmd_write_timestamp(cmd, PipelineStages::TOP_OF_PIPE, pool, 0);
    }

    /// Mark the end of the chain at `index` and flip to the other pool.
    pub fn end(&mut self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle, index: u32) {
        backend.cmd_write_timestamp(cmd, PipelineStages::BOTTOM_OF_PIPE, self.current(), index);
        self.current = 1 - self.current;
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        for pool in self.pools {
            backend.destroy_query_pool(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn resolved(ticks: u64) -> TimestampQuery {
        TimestampQuery {
            ticks,
            available: true,
        }
    }

    #[test]
    fn test_elapsed_ms_scales_by_period() {
        assert_eq!(elapsed_ms(resolved(1_000), resolved(3_000_000), 1.0), 2.999);
        assert_eq!(elapsed_ms(resolved(0), resolved(1_000_000), 2.5), 2.5);
    }

    #[test]
    fn test_elapsed_ms_unresolved_is_zero() {
        assert_eq!(elapsed_ms(TimestampQuery::default(), resolved(10), 1.0), 0.0);
        assert_eq!(elapsed_ms(resolved(10), TimestampQuery::default(), 1.0), 0.0);
    }

    #[test]
    fn test_pools_alternate() {
        let mut backend = DummyBackend::new();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(cmd).unwrap();

        let mut pools = TimestampPools::new(&mut backend, 1.0).unwrap();
        let first = pools.current();
        pools.begin(&mut backend, cmd);
        pools.end(&mut backend, cmd, 1);
        assert_ne!(pools.current(), first);
        pools.end(&mut backend, cmd, 1);
        assert_eq!(pools.current(), first);

        pools.destroy(&mut backend);
    }
}
