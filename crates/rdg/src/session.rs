use std::fmt::Display;

///Statistics of the most recent graph built with this session.
///
/// Owned by the caller and handed to [Rdg::record](crate::Rdg::record), which resets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSession {
    pub declared_passes: u32,
    pub culled_passes: u32,
    pub merged_passes: u32,
    pub textures: u32,
    pub buffers: u32,
    pub views: u32,
    pub external_resources: u32,
    pub transitions: u32,
    pub cross_pipeline_fences: u32,
    pub transient_resources: u32,
    pub transient_slots: u32,
    ///Resources placed into a slot that was used by another resource before.
    pub aliased_resources: u32,
    ///Transient candidates too big for every slot class.
    pub transient_overflows: u32,
    pub transient_bytes: u64,
    pub pool_hits: u32,
    pub pool_misses: u32,
    pub spans: u32,
    pub parallel_spans: u32,
}

impl GraphSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = GraphSession::default();
    }
}

impl Display for GraphSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "passes: {} declared, {} culled, {} merged",
            self.declared_passes, self.culled_passes, self.merged_passes
        )?;
        writeln!(
            f,
            "resources: {} textures, {} buffers, {} views, {} external",
            self.textures, self.buffers, self.views, self.external_resources
        )?;
        writeln!(
            f,
            "sync: {} transitions, {} cross pipeline fences",
            self.transitions, self.cross_pipeline_fences
        )?;
        writeln!(
            f,
            "transient: {} resources in {} slots ({} aliased, {} overflows, {} bytes)",
            self.transient_resources,
            self.transient_slots,
            self.aliased_resources,
            self.transient_overflows,
            self.transient_bytes
        )?;
        writeln!(f, "pool: {} hits, {} misses", self.pool_hits, self.pool_misses)?;
        write!(f, "spans: {} ({} parallel)", self.spans, self.parallel_spans)
    }
}
