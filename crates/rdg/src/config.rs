///Settings of the transient allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientConfig {
    ///If false, every graph created resource is allocated from the pool.
    pub enabled: bool,
    ///Smallest slot size class in bytes. Must be a power of two.
    pub min_slot_size: u64,
    ///Largest slot size class in bytes. Bigger resources get a dedicated allocation.
    pub max_slot_size: u64,
}

impl Default for TransientConfig {
    fn default() -> Self {
        TransientConfig {
            enabled: true,
            min_slot_size: 64 * 1024,
            max_slot_size: 256 * 1024 * 1024,
        }
    }
}

impl TransientConfig {
    ///Returns the size class `bytes` falls into, or None if it exceeds [Self::max_slot_size].
    pub fn size_class(&self, bytes: u64) -> Option<u64> {
        let class = bytes.max(self.min_slot_size).checked_next_power_of_two()?;
        if class > self.max_slot_size {
            None
        } else {
            Some(class)
        }
    }
}

///Settings of the span partitioning used for parallel recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    pub enabled: bool,
    ///Spans with fewer passes are recorded inline on the executing thread.
    pub min_span_passes: usize,
    ///Spans are split once they reach this many passes.
    pub max_span_passes: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            enabled: true,
            min_span_passes: 2,
            max_span_passes: 32,
        }
    }
}

///Graph wide configuration. Owned by [Rdg](crate::Rdg) and read by every graph recorded from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdgConfig {
    ///Checks access declarations against usage flags, pipelines and each other while compiling.
    pub validation: bool,
    ///If false, async compute passes run on the graphics pipeline.
    pub async_compute: bool,
    ///If false, every declared pass is executed.
    pub cull_passes: bool,
    pub merge_render_passes: bool,
    pub transient: TransientConfig,
    pub parallel: ParallelConfig,
    ///Number of executed graphs a pooled resource may stay unused before it is destroyed.
    pub pool_timeout: u64,
}

impl RdgConfig {
    pub const DEFAULT_POOL_TIMEOUT: u64 = 31;
}

impl Default for RdgConfig {
    fn default() -> Self {
        RdgConfig {
            validation: cfg!(debug_assertions),
            async_compute: true,
            cull_passes: true,
            merge_render_passes: true,
            transient: TransientConfig::default(),
            parallel: ParallelConfig::default(),
            pool_timeout: Self::DEFAULT_POOL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes() {
        let cfg = TransientConfig {
            enabled: true,
            min_slot_size: 256,
            max_slot_size: 4096,
        };
        assert_eq!(cfg.size_class(1), Some(256));
        assert_eq!(cfg.size_class(256), Some(256));
        assert_eq!(cfg.size_class(257), Some(512));
        assert_eq!(cfg.size_class(4096), Some(4096));
        assert_eq!(cfg.size_class(4097), None);
    }
}
