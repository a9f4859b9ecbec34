//! Turns a declared [RenderGraph](crate::RenderGraph) into a [CompiledGraph].
//!
//! Stages run in this order:
//!
//! 1. validate: finalize deferred descriptors, expand views and binding groups, check and merge accesses per pass,
//! 2. deps: producer/consumer edges per subresource, culling from the epilogue,
//! 3. merge: merging of compatible raster passes into render pass groups,
//! 4. lifetime: first/last use, backing decision and transient slot assignment,
//! 5. barrier: transition batches and cross pipeline fences,
//! 6. span partitioning for parallel recording.

use std::fmt::Display;

use ahash::AHashMap;
use rdg_device::{Access, Fence, Pipeline, SubresourceRange, SubresourceState};

use crate::{
    GraphSession, PassFlags, PassHandle, Rdg, RdgError, RenderGraph,
    execute::span,
    graph::PostExecuteFn,
    pass::ExecuteFn,
    resources::{AnyHandle, Registry, ViewHandle},
};

pub(crate) mod barrier;
pub(crate) mod deps;
pub(crate) mod lifetime;
pub(crate) mod merge;
pub(crate) mod validate;

pub use barrier::{BarrierBatch, PlannedTransition};
pub use lifetime::{Backing, ResourcePlan, TransientSlot};
pub use crate::execute::span::{SpanMode, SpanPlan};

///Index into the compiled pass list. Index 0 is the graph prologue, the last index the graph epilogue. User pass `n`
/// lives at `n + 1`.
pub type PassIndex = usize;

pub(crate) const PROLOGUE: PassIndex = 0;

///Merged access of a pass to one subresource range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAccess {
    pub resource: AnyHandle,
    pub range: SubresourceRange,
    pub access: Access,
}

impl ResolvedAccess {
    ///True for accesses that bind the range as color or depth attachment.
    pub fn is_attachment(&self) -> bool {
        !self.access.is_empty()
            && (Access::RTV | Access::DSV_READ | Access::DSV_WRITE).contains(self.access)
    }
}

///Resources and views a pass body may resolve through its context.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassBindingDecl {
    pub resources: Vec<AnyHandle>,
    pub views: Vec<(ViewHandle, AnyHandle, SubresourceRange)>,
}

impl PassBindingDecl {
    pub fn add_resource(&mut self, resource: AnyHandle) {
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
    }

    pub fn add_view(&mut self, view: ViewHandle, parent: AnyHandle, range: SubresourceRange) {
        if !self.views.iter().any(|(v, _, _)| *v == view) {
            self.views.push((view, parent, range));
        }
    }
}

///Indices into [CompiledGraph::batches] the pass records around its body.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassBarriers {
    ///Begun before the body.
    pub prologue_begin: Vec<usize>,
    ///Ended before the body, after waiting for the batch's fence.
    pub prologue_end: Vec<usize>,
    ///Begun after the body. Ended by a later pass.
    pub epilogue_begin: Vec<usize>,
}

///A pass after compilation.
pub struct CompiledPass {
    pub(crate) name: String,
    pub(crate) handle: Option<PassHandle>,
    pub(crate) flags: PassFlags,
    pub(crate) pipeline: Pipeline,
    pub(crate) accesses: Vec<ResolvedAccess>,
    pub(crate) bindings: PassBindingDecl,
    pub(crate) execute: Option<ExecuteFn>,
    pub(crate) dependencies: Vec<PassIndex>,
    pub(crate) kept: bool,
    pub(crate) merge_group: Option<u32>,
    ///Pass that records the prologue barriers of this one. Differs from the pass itself within merge groups.
    pub(crate) prologue_pass: PassIndex,
    pub(crate) epilogue_pass: PassIndex,
    pub(crate) allocations: Vec<AnyHandle>,
    pub(crate) deallocations: Vec<AnyHandle>,
    pub(crate) barriers: PassBarriers,
    pub(crate) waits: Vec<Fence>,
    pub(crate) signal: Option<Fence>,
}

impl CompiledPass {
    pub(crate) fn new(index: PassIndex, name: &str, flags: PassFlags, pipeline: Pipeline) -> Self {
        CompiledPass {
            name: name.to_owned(),
            handle: None,
            flags,
            pipeline,
            accesses: Vec::new(),
            bindings: PassBindingDecl::default(),
            execute: None,
            dependencies: Vec::new(),
            kept: false,
            merge_group: None,
            prologue_pass: index,
            epilogue_pass: index,
            allocations: Vec::new(),
            deallocations: Vec::new(),
            barriers: PassBarriers::default(),
            waits: Vec::new(),
            signal: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    ///Handle of the declared pass. None for the graph prologue and epilogue.
    pub fn handle(&self) -> Option<PassHandle> {
        self.handle
    }

    pub fn flags(&self) -> PassFlags {
        self.flags
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn accesses(&self) -> &[ResolvedAccess] {
        &self.accesses
    }

    pub fn dependencies(&self) -> &[PassIndex] {
        &self.dependencies
    }

    pub fn is_kept(&self) -> bool {
        self.kept
    }

    pub fn merge_group(&self) -> Option<u32> {
        self.merge_group
    }

    ///Resources whose physical backing comes alive at this pass.
    pub fn allocations(&self) -> &[AnyHandle] {
        &self.allocations
    }

    ///Resources that are free for reuse after this pass.
    pub fn deallocations(&self) -> &[AnyHandle] {
        &self.deallocations
    }

    pub fn waits(&self) -> &[Fence] {
        &self.waits
    }

    pub fn signal(&self) -> Option<Fence> {
        self.signal
    }

    ///Batches begun before the body.
    pub fn prologue_begin(&self) -> &[usize] {
        &self.barriers.prologue_begin
    }

    ///Batches ended before the body.
    pub fn prologue_end(&self) -> &[usize] {
        &self.barriers.prologue_end
    }

    ///Batches begun after the body.
    pub fn epilogue_begin(&self) -> &[usize] {
        &self.barriers.epilogue_begin
    }
}

///Executable plan of a graph. Inspect it, print it, then [execute](CompiledGraph::execute) it.
pub struct CompiledGraph<'rdg> {
    pub(crate) rdg: &'rdg mut Rdg,
    pub(crate) session: &'rdg mut GraphSession,
    pub(crate) registry: Registry,
    pub(crate) passes: Vec<CompiledPass>,
    pub(crate) resources: Vec<ResourcePlan>,
    pub(crate) resource_index: AHashMap<AnyHandle, usize>,
    pub(crate) slots: Vec<TransientSlot>,
    pub(crate) batches: Vec<BarrierBatch>,
    ///State of every resource that outlives the graph once it finished.
    pub(crate) final_states: AHashMap<AnyHandle, Vec<(SubresourceRange, SubresourceState)>>,
    pub(crate) spans: Vec<SpanPlan>,
    pub(crate) post_execute: Vec<PostExecuteFn>,
}

impl<'rdg> CompiledGraph<'rdg> {
    ///All passes including the synthetic prologue and epilogue.
    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    pub fn index_of(&self, handle: PassHandle) -> PassIndex {
        handle.index() + 1
    }

    pub fn pass(&self, handle: PassHandle) -> Option<&CompiledPass> {
        self.passes.get(self.index_of(handle)).filter(|p| p.handle == Some(handle))
    }

    pub fn epilogue(&self) -> PassIndex {
        self.passes.len() - 1
    }

    pub fn is_kept(&self, handle: PassHandle) -> bool {
        self.pass(handle).map(|p| p.kept).unwrap_or(false)
    }

    ///Names of the passes whose body will run, in execution order.
    pub fn kept_pass_names(&self) -> Vec<&str> {
        self.passes
            .iter()
            .filter(|p| p.kept && p.handle.is_some())
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn resource_plan(&self, handle: impl Into<AnyHandle>) -> Option<&ResourcePlan> {
        self.resource_index
            .get(&handle.into())
            .map(|idx| &self.resources[*idx])
    }

    pub fn resource_plans(&self) -> &[ResourcePlan] {
        &self.resources
    }

    pub fn transient_slots(&self) -> &[TransientSlot] {
        &self.slots
    }

    pub fn batches(&self) -> &[BarrierBatch] {
        &self.batches
    }

    pub fn spans(&self) -> &[SpanPlan] {
        &self.spans
    }

    ///Tracked state of `handle` after the graph, if it outlives the graph.
    pub fn final_state(
        &self,
        handle: impl Into<AnyHandle>,
    ) -> Option<&[(SubresourceRange, SubresourceState)]> {
        self.final_states.get(&handle.into()).map(|s| s.as_slice())
    }

    pub(crate) fn resource_name(&self, handle: AnyHandle) -> &str {
        self.registry
            .resource(handle)
            .map(|r| r.name.as_str())
            .unwrap_or("<unknown>")
    }
}

///Runs every compile stage on `graph`.
pub(crate) fn compile(graph: RenderGraph<'_>) -> Result<CompiledGraph<'_>, RdgError> {
    let RenderGraph {
        rdg,
        session,
        mut registry,
        passes: nodes,
        setup_tasks,
        commit,
        post_execute,
    } = graph;
    let config = rdg.config;

    for task in &setup_tasks {
        task.wait()?;
    }
    validate::finalize_descriptors(&mut registry, &commit)?;

    session.declared_passes = nodes.len() as u32;
    session.textures = registry.textures.len() as u32;
    session.buffers = registry.buffers.len() as u32;
    session.views = registry.views.len() as u32;
    session.external_resources = registry.iter().filter(|(_, r)| r.is_external()).count() as u32;

    let mut passes = Vec::with_capacity(nodes.len() + 2);
    passes.push(CompiledPass::new(
        PROLOGUE,
        "<prologue>",
        PassFlags::empty(),
        Pipeline::Graphics,
    ));

    for (idx, mut node) in nodes.into_iter().enumerate() {
        let (accesses, bindings) = validate::resolve_pass(&registry, &node, config.validation)?;
        let pipeline = if node.flags.contains(PassFlags::ASYNC_COMPUTE) && config.async_compute {
            Pipeline::AsyncCompute
        } else {
            Pipeline::Graphics
        };
        let mut pass = CompiledPass::new(idx + 1, &node.name, node.flags, pipeline);
        pass.handle = Some(PassHandle(idx as u32));
        pass.accesses = accesses;
        pass.bindings = bindings;
        pass.execute = node.execute.take();
        passes.push(pass);
    }

    let epilogue_idx = passes.len();
    let mut epilogue = CompiledPass::new(
        epilogue_idx,
        "<epilogue>",
        PassFlags::empty(),
        Pipeline::Graphics,
    );
    epilogue.accesses = registry
        .iter()
        .filter(|(_, res)| res.extraction.is_some() || res.final_access.is_some())
        .map(|(handle, res)| ResolvedAccess {
            resource: handle,
            range: res.desc.whole_range(),
            //an empty access keeps the producers alive without planning a transition
            access: res.final_access.unwrap_or(Access::empty()),
        })
        .collect();
    passes.push(epilogue);

    deps::build_dependencies(&mut passes, &registry);
    deps::cull(&mut passes, config.cull_passes);
    session.culled_passes = passes.iter().filter(|p| !p.kept).count() as u32;

    if config.merge_render_passes {
        session.merged_passes = merge::merge_render_passes(&mut passes);
    }

    let lifetimes = lifetime::plan(&mut passes, &registry, &config.transient, session);
    let barriers = barrier::plan(&mut passes, &registry, &lifetimes.resources, session);
    let spans = span::partition(&passes, &config.parallel);
    session.spans = spans.len() as u32;
    session.parallel_spans = spans
        .iter()
        .filter(|s| s.mode == SpanMode::Parallel)
        .count() as u32;

    #[cfg(feature = "logging")]
    log::trace!(
        "Compiled graph: {} passes, {} culled, {} spans",
        passes.len(),
        session.culled_passes,
        spans.len()
    );

    let resource_index = lifetimes
        .resources
        .iter()
        .enumerate()
        .map(|(idx, plan)| (plan.handle, idx))
        .collect();

    Ok(CompiledGraph {
        rdg,
        session,
        registry,
        passes,
        resources: lifetimes.resources,
        resource_index,
        slots: lifetimes.slots,
        batches: barriers.batches,
        final_states: barriers.final_states,
        spans,
        post_execute,
    })
}

impl<'rdg> Display for CompiledGraph<'rdg> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kept = self.passes.iter().filter(|p| p.kept).count();
        writeln!(
            f,
            "RenderGraph: {} passes, {} kept, {} culled",
            self.passes.len(),
            kept,
            self.passes.len() - kept
        )?;

        for (idx, pass) in self.passes.iter().enumerate() {
            if !pass.kept {
                writeln!(f, "  [{idx}] {} culled", pass.name)?;
                continue;
            }
            write!(f, "  [{idx}] {} on {}", pass.name, pass.pipeline)?;
            if let Some(group) = pass.merge_group {
                write!(f, " group {group}")?;
            }
            writeln!(f)?;
            for fence in &pass.waits {
                writeln!(f, "      wait {fence}")?;
            }
            for handle in &pass.allocations {
                let backing = self
                    .resource_plan(*handle)
                    .map(|p| p.backing.to_string())
                    .unwrap_or_default();
                writeln!(f, "      alloc {} {backing}", self.resource_name(*handle))?;
            }
            for batch in &pass.barriers.prologue_begin {
                writeln!(f, "      begin batch {batch}")?;
            }
            for batch in &pass.barriers.prologue_end {
                writeln!(f, "      end batch {batch}")?;
            }
            for batch in &pass.barriers.epilogue_begin {
                writeln!(f, "      begin batch {batch} after")?;
            }
            for handle in &pass.deallocations {
                writeln!(f, "      free {}", self.resource_name(*handle))?;
            }
            if let Some(fence) = pass.signal {
                writeln!(f, "      signal {fence}")?;
            }
        }

        for (idx, batch) in self.batches.iter().enumerate() {
            writeln!(f, "Batch {idx}: {batch}")?;
            for transition in &batch.transitions {
                writeln!(
                    f,
                    "    {} {}: {} -> {}",
                    self.resource_name(transition.resource),
                    transition.range,
                    transition.before,
                    transition.after
                )?;
            }
        }

        for (idx, slot) in self.slots.iter().enumerate() {
            let names = slot
                .occupants
                .iter()
                .map(|h| self.resource_name(*h))
                .collect::<Vec<_>>();
            writeln!(f, "Slot {idx}: {} bytes, {:?}", slot.size, names)?;
        }

        for span in &self.spans {
            writeln!(f, "{span}")?;
        }
        Ok(())
    }
}
