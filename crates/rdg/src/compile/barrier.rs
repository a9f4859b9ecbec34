use std::fmt::Display;

use ahash::AHashMap;
use rdg_device::{AccessState, Fence, Pipeline, SubresourceRange, SubresourceState};

use super::{Backing, CompiledPass, PROLOGUE, PassIndex, ResourcePlan};
use crate::{
    GraphSession,
    resources::{AnyHandle, Registry, range_map::RangeMap},
};

///State change of a subresource range, planned against graph handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTransition {
    pub resource: AnyHandle,
    pub range: SubresourceRange,
    pub before: SubresourceState,
    pub after: AccessState,
}

impl PlannedTransition {
    pub fn is_cross_pipeline(&self) -> bool {
        self.before
            .pipeline()
            .map(|p| p != self.after.pipeline)
            .unwrap_or(false)
    }
}

///Transitions that are begun and ended together.
///
/// Immediate batches begin and end in the prologue of the same pass. Cross pipeline batches begin in the epilogue of
/// the producing pass, which then signals [fence](Self::fence), and end in the prologue of the first consuming pass
/// after waiting for it.
#[derive(Debug, Clone)]
pub struct BarrierBatch {
    pub(crate) transitions: Vec<PlannedTransition>,
    pub(crate) begin_pass: PassIndex,
    pub(crate) end_pass: Option<PassIndex>,
    pub(crate) cross_pipeline: bool,
    pub(crate) fence: Option<Fence>,
}

impl BarrierBatch {
    fn new(begin_pass: PassIndex, cross_pipeline: bool) -> Self {
        BarrierBatch {
            transitions: Vec::new(),
            begin_pass,
            end_pass: None,
            cross_pipeline,
            fence: None,
        }
    }

    pub fn transitions(&self) -> &[PlannedTransition] {
        &self.transitions
    }

    pub fn begin_pass(&self) -> PassIndex {
        self.begin_pass
    }

    pub fn end_pass(&self) -> Option<PassIndex> {
        self.end_pass
    }

    pub fn is_cross_pipeline(&self) -> bool {
        self.cross_pipeline
    }

    pub fn fence(&self) -> Option<Fence> {
        self.fence
    }
}

impl Display for BarrierBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} transitions, begin [{}]", self.transitions.len(), self.begin_pass)?;
        if let Some(end) = self.end_pass {
            write!(f, " end [{}]", end)?;
        }
        if let Some(fence) = self.fence {
            write!(f, " via {}", fence)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tracked {
    state: SubresourceState,
    ///Last pass that accessed the range.
    last_pass: Option<PassIndex>,
}

pub(crate) struct BarrierPlan {
    pub batches: Vec<BarrierBatch>,
    pub final_states: AHashMap<AnyHandle, Vec<(SubresourceRange, SubresourceState)>>,
}

#[derive(Default)]
struct Batcher {
    batches: Vec<BarrierBatch>,
    ///Cross pipeline batch begun at a pass' epilogue.
    cross: AHashMap<PassIndex, usize>,
    ///Immediate batch of a pass' prologue.
    immediate: AHashMap<PassIndex, usize>,
}

impl Batcher {
    fn push(
        &mut self,
        passes: &mut [CompiledPass],
        transition: PlannedTransition,
        producer: Option<PassIndex>,
        consumer: PassIndex,
    ) {
        let consumer_prologue = passes[consumer].prologue_pass;
        let batch = match (transition.is_cross_pipeline(), producer) {
            (true, Some(producer)) => {
                let begin = passes[producer].epilogue_pass;
                let batch = match self.cross.get(&begin) {
                    Some(b) => *b,
                    None => {
                        self.batches.push(BarrierBatch::new(begin, true));
                        let b = self.batches.len() - 1;
                        passes[begin].barriers.epilogue_begin.push(b);
                        self.cross.insert(begin, b);
                        b
                    }
                };
                //the first consumer ends the batch, later ones are ordered after it on the same pipeline
                if self.batches[batch].end_pass.is_none() {
                    self.batches[batch].end_pass = Some(consumer_prologue);
                    passes[consumer_prologue].barriers.prologue_end.push(batch);
                }
                batch
            }
            _ => match self.immediate.get(&consumer_prologue) {
                Some(b) => *b,
                None => {
                    let mut new = BarrierBatch::new(consumer_prologue, false);
                    new.end_pass = Some(consumer_prologue);
                    self.batches.push(new);
                    let b = self.batches.len() - 1;
                    passes[consumer_prologue].barriers.prologue_begin.push(b);
                    passes[consumer_prologue].barriers.prologue_end.push(b);
                    self.immediate.insert(consumer_prologue, b);
                    b
                }
            },
        };

        #[cfg(feature = "log_reasoning")]
        log::trace!(
            "{} {}: {} -> {} for {} in batch {}",
            transition.resource,
            transition.range,
            transition.before,
            transition.after,
            passes[consumer].name,
            batch
        );
        self.batches[batch].transitions.push(transition);
    }
}

///Walks the kept passes in order and tracks the state of every subresource. Each access whose state differs from the
/// tracked one gets a transition. Afterwards every cross pipeline batch is assigned a fence.
pub(crate) fn plan(
    passes: &mut [CompiledPass],
    registry: &Registry,
    resources: &[ResourcePlan],
    session: &mut GraphSession,
) -> BarrierPlan {
    let epilogue = passes.len() - 1;
    let mut trackers: AHashMap<AnyHandle, RangeMap<Tracked>> = AHashMap::default();
    for plan in resources.iter().filter(|p| !matches!(p.backing, Backing::Dead)) {
        let Some(res) = registry.resource(plan.handle) else {
            continue;
        };
        let unknown = Tracked {
            state: SubresourceState::Unknown,
            last_pass: None,
        };
        //external states enter the graph through the prologue
        let initial = res.initial_states.iter().map(|(range, state)| {
            let last_pass = match state {
                SubresourceState::Known(_) => Some(PROLOGUE),
                SubresourceState::Unknown => None,
            };
            (
                *range,
                Tracked {
                    state: *state,
                    last_pass,
                },
            )
        });
        trackers.insert(
            plan.handle,
            RangeMap::from_segments(res.desc.whole_range(), unknown, initial),
        );
    }

    let mut batcher = Batcher::default();
    for idx in 0..passes.len() {
        if !passes[idx].kept {
            continue;
        }
        let pipeline = passes[idx].pipeline;
        let accesses = passes[idx].accesses.clone();
        for access in accesses.iter().filter(|a| !a.access.is_empty()) {
            let Some(tracker) = trackers.get_mut(&access.resource) else {
                continue;
            };
            let target = AccessState::new(access.access, pipeline);
            let segments = tracker
                .overlapping(access.range)
                .map(|(range, tracked)| (range, *tracked))
                .collect::<Vec<_>>();
            for (range, tracked) in segments {
                if tracked.state == SubresourceState::Known(target) {
                    continue;
                }
                batcher.push(
                    passes,
                    PlannedTransition {
                        resource: access.resource,
                        range,
                        before: tracked.state,
                        after: target,
                    },
                    tracked.last_pass,
                    idx,
                );
            }
            tracker.set(
                access.range,
                Tracked {
                    state: SubresourceState::Known(target),
                    last_pass: Some(idx),
                },
            );
        }
    }

    //resources leave the graph on the graphics pipeline
    let mut final_states = AHashMap::default();
    for (handle, res) in registry.iter().filter(|(_, r)| r.outlives_graph()) {
        let Some(tracker) = trackers.get_mut(&handle) else {
            continue;
        };
        if res.final_access.is_none() {
            let segments = tracker
                .iter()
                .map(|(range, tracked)| (range, *tracked))
                .collect::<Vec<_>>();
            for (range, tracked) in segments {
                let SubresourceState::Known(state) = tracked.state else {
                    continue;
                };
                if state.pipeline == Pipeline::Graphics {
                    continue;
                }
                let target = AccessState::graphics(state.access);
                batcher.push(
                    passes,
                    PlannedTransition {
                        resource: handle,
                        range,
                        before: tracked.state,
                        after: target,
                    },
                    tracked.last_pass,
                    epilogue,
                );
                tracker.set(
                    range,
                    Tracked {
                        state: SubresourceState::Known(target),
                        last_pass: Some(epilogue),
                    },
                );
            }
        }
        final_states.insert(
            handle,
            tracker
                .iter()
                .map(|(range, tracked)| (range, tracked.state))
                .collect(),
        );
    }

    let mut batches = batcher.batches;
    assign_fences(passes, &mut batches);

    session.transitions = batches.iter().map(|b| b.transitions.len() as u32).sum();
    session.cross_pipeline_fences = passes.iter().filter(|p| p.signal.is_some()).count() as u32;

    BarrierPlan {
        batches,
        final_states,
    }
}

///Every pass beginning a cross pipeline batch signals the next value of its pipeline's timeline. Passes ending such
/// a batch wait for it.
fn assign_fences(passes: &mut [CompiledPass], batches: &mut [BarrierBatch]) {
    let mut timeline = [0u64; 2];
    for pass in passes.iter_mut().filter(|p| p.kept) {
        if pass.barriers.epilogue_begin.is_empty() {
            continue;
        }
        let counter = &mut timeline[pass.pipeline.index()];
        *counter += 1;
        let fence = Fence::new(pass.pipeline, *counter);
        pass.signal = Some(fence);
        for batch in &pass.barriers.epilogue_begin {
            batches[*batch].fence = Some(fence);
        }
    }

    for pass in passes.iter_mut().filter(|p| p.kept) {
        let mut waits: Vec<Fence> = Vec::new();
        for fence in pass
            .barriers
            .prologue_end
            .iter()
            .filter_map(|b| batches[*b].fence)
        {
            match waits.iter_mut().find(|w| w.pipeline == fence.pipeline) {
                Some(existing) => existing.value = existing.value.max(fence.value),
                None => waits.push(fence),
            }
        }
        pass.waits = waits;
    }
}

#[cfg(test)]
mod tests {
    use rdg_device::{Access, BufferDesc, BufferUsage};

    use super::*;
    use crate::{
        PassFlags,
        compile::{ResolvedAccess, lifetime::plan as plan_lifetimes},
        config::TransientConfig,
    };

    fn pass(idx: PassIndex, pipeline: Pipeline, accesses: &[(AnyHandle, Access)]) -> CompiledPass {
        let mut p = CompiledPass::new(idx, &format!("p{idx}"), PassFlags::COMPUTE, pipeline);
        p.kept = true;
        p.accesses = accesses
            .iter()
            .map(|(resource, access)| ResolvedAccess {
                resource: *resource,
                range: SubresourceRange::WHOLE_BUFFER,
                access: *access,
            })
            .collect();
        p
    }

    fn run(passes: &mut [CompiledPass], reg: &Registry) -> BarrierPlan {
        let mut session = GraphSession::new();
        let lifetimes = plan_lifetimes(passes, reg, &TransientConfig::default(), &mut session);
        plan(passes, reg, &lifetimes.resources, &mut session)
    }

    fn storage(reg: &mut Registry, name: &str) -> AnyHandle {
        reg.create_buffer(
            BufferDesc::new(4, 64, BufferUsage::STORAGE | BufferUsage::INDIRECT),
            name,
            false,
        )
        .unwrap()
        .into()
    }

    #[test]
    fn write_then_read_on_one_pipeline() {
        let mut reg = Registry::default();
        let a = storage(&mut reg, "a");
        let g = Pipeline::Graphics;
        let mut passes = vec![
            pass(0, g, &[]),
            pass(1, g, &[(a, Access::UAV_COMPUTE)]),
            pass(2, g, &[(a, Access::SRV_COMPUTE)]),
            pass(3, g, &[(a, Access::SRV_COMPUTE)]),
            pass(4, g, &[]),
        ];
        let plan = run(&mut passes, &reg);

        assert_eq!(plan.batches.len(), 2);
        assert_eq!(passes[1].barriers.prologue_begin, vec![0]);
        let first = &plan.batches[0].transitions[0];
        assert_eq!(first.before, SubresourceState::Unknown);
        assert_eq!(first.after, AccessState::graphics(Access::UAV_COMPUTE));
        let second = &plan.batches[1].transitions[0];
        assert_eq!(second.before, SubresourceState::Known(AccessState::graphics(Access::UAV_COMPUTE)));
        assert_eq!(second.after, AccessState::graphics(Access::SRV_COMPUTE));
        //the second read needs nothing
        assert!(passes[3].barriers.prologue_begin.is_empty());
        assert!(passes.iter().all(|p| p.waits.is_empty() && p.signal.is_none()));
    }

    #[test]
    fn cross_pipeline_batches_get_fences() {
        let mut reg = Registry::default();
        let a = storage(&mut reg, "a");
        let b = storage(&mut reg, "b");
        let (g, c) = (Pipeline::Graphics, Pipeline::AsyncCompute);
        let mut passes = vec![
            pass(0, g, &[]),
            pass(1, c, &[(a, Access::UAV_COMPUTE), (b, Access::UAV_COMPUTE)]),
            pass(2, g, &[(a, Access::INDIRECT_ARGS)]),
            pass(3, g, &[(b, Access::SRV_COMPUTE)]),
            pass(4, g, &[]),
        ];
        let plan = run(&mut passes, &reg);

        let cross = plan
            .batches
            .iter()
            .filter(|b| b.cross_pipeline)
            .collect::<Vec<_>>();
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].begin_pass, 1);
        assert_eq!(cross[0].end_pass, Some(2));
        assert_eq!(cross[0].transitions.len(), 2);
        assert!(cross[0].transitions.iter().all(|t| t.is_cross_pipeline()));

        let fence = Fence::new(Pipeline::AsyncCompute, 1);
        assert_eq!(passes[1].signal, Some(fence));
        assert_eq!(passes[2].waits, vec![fence]);
        assert!(passes[3].waits.is_empty());
    }

    #[test]
    fn external_state_is_respected() {
        let mut reg = Registry::default();
        let ext = reg
            .register_external(
                crate::resources::ExternalSource::Device(rdg_device::ResourceId(7)),
                rdg_device::ResourceDesc::Buffer(BufferDesc::new(4, 4, BufferUsage::STORAGE)),
                vec![(
                    SubresourceRange::WHOLE_BUFFER,
                    SubresourceState::Known(AccessState::graphics(Access::SRV_COMPUTE)),
                )],
                "ext",
            )
            .unwrap();
        let g = Pipeline::Graphics;
        let c = Pipeline::AsyncCompute;
        let mut passes = vec![
            pass(0, g, &[]),
            pass(1, g, &[(ext, Access::SRV_COMPUTE)]),
            pass(2, c, &[(ext, Access::UAV_COMPUTE)]),
            pass(3, g, &[]),
        ];
        let plan = run(&mut passes, &reg);

        //reading in the known state needs no transition
        assert!(passes[1].barriers.prologue_begin.is_empty());
        //async write pulls the resource over from graphics, the epilogue hands it back
        assert_eq!(passes[1].signal, Some(Fence::new(Pipeline::Graphics, 1)));
        assert_eq!(passes[2].waits, vec![Fence::new(Pipeline::Graphics, 1)]);
        assert_eq!(passes[2].signal, Some(Fence::new(Pipeline::AsyncCompute, 1)));
        assert_eq!(passes[3].waits, vec![Fence::new(Pipeline::AsyncCompute, 1)]);
        assert_eq!(
            plan.final_states[&ext],
            vec![(
                SubresourceRange::WHOLE_BUFFER,
                SubresourceState::Known(AccessState::graphics(Access::UAV_COMPUTE))
            )]
        );
    }
}
