//! Execution of a [CompiledGraph]: physical resource creation, span recording on workers, in-order submission and
//! cleanup.

use std::sync::Arc;

use ahash::AHashMap;
use rdg_device::{
    CommandStream, Device, DeviceError, Fence, MemoryPlacement, Pipeline, ResourceDesc,
    ResourceId, SubresourceRange, SubresourceState, Transition, Workers,
};

use crate::{
    RdgError,
    compile::{Backing, CompiledGraph, PassIndex, PlannedTransition},
    graph::ExtractedResource,
    pass::{ExecuteFn, PassBindings, PassContext},
    resources::{AnyHandle, ExternalSource, PooledResource, Registry},
};

pub(crate) mod span;

use span::SpanMode;

///Result of an executed graph.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    ///Names of the passes whose body was recorded, in submission order.
    pub executed_passes: Vec<String>,
    ///State every external resource was left in.
    pub tracked_states: Vec<(ResourceId, Vec<(SubresourceRange, SubresourceState)>)>,
    pub submitted_spans: usize,
}

impl ExecutionReport {
    ///Tracked state of an external resource after the graph.
    pub fn state_of(&self, id: ResourceId) -> Option<&[(SubresourceRange, SubresourceState)]> {
        self.tracked_states
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, s)| s.as_slice())
    }
}

enum Step {
    Begin(Vec<Transition>),
    End(Vec<Transition>),
    BeginRenderPass(String),
    EndRenderPass,
    Pass {
        name: String,
        execute: Option<ExecuteFn>,
        bindings: PassBindings,
    },
}

///Everything needed to record one span, owned so it can move to a worker.
struct SpanWork {
    pipeline: Pipeline,
    name: String,
    waits: Vec<Fence>,
    steps: Vec<Step>,
    signal: Option<Fence>,
}

fn record_span(device: &dyn Device, work: SpanWork) -> Result<Box<dyn CommandStream>, DeviceError> {
    let mut stream = device.create_stream(work.pipeline, &work.name)?;
    for fence in &work.waits {
        stream.wait(*fence);
    }
    for step in work.steps {
        match step {
            Step::Begin(transitions) => stream.begin_transitions(&transitions),
            Step::End(transitions) => stream.end_transitions(&transitions),
            Step::BeginRenderPass(name) => stream.begin_render_pass(&name),
            Step::EndRenderPass => stream.end_render_pass(),
            Step::Pass {
                name,
                execute,
                bindings,
            } => {
                #[cfg(feature = "debug_marker")]
                stream.begin_event(&name);
                if let Some(execute) = execute {
                    let mut ctx = PassContext {
                        stream: stream.as_mut(),
                        bindings: &bindings,
                        name: &name,
                    };
                    execute(&mut ctx);
                }
                #[cfg(feature = "debug_marker")]
                stream.end_event();
            }
        }
    }
    if let Some(fence) = work.signal {
        stream.signal(fence);
    }
    Ok(stream)
}

///Records `run` on `workers` and returns the streams in span order. Returns only after every spawned job has
/// reported back or was dropped by the workers.
fn record_run(
    device: &Arc<dyn Device>,
    workers: &dyn Workers,
    run: Vec<(usize, SpanWork)>,
) -> Result<Vec<Box<dyn CommandStream>>, RdgError> {
    let first = run.first().map(|(idx, _)| *idx).unwrap_or(0);
    let (sender, receiver) =
        crossbeam_channel::unbounded::<(usize, Result<Box<dyn CommandStream>, DeviceError>)>();

    let mut spawned = 0;
    let mut spawn_error = None;
    for (idx, work) in run {
        let device = device.clone();
        let sender = sender.clone();
        let job = Box::new(move || {
            let recorded = record_span(device.as_ref(), work);
            let _ = sender.send((idx - first, recorded));
        });
        if let Err(e) = workers.spawn(job) {
            spawn_error = Some(e);
            break;
        }
        spawned += 1;
    }
    //only jobs hold senders now, the iterator ends once each of them finished or was dropped
    drop(sender);

    let mut recorded: Vec<Option<Result<Box<dyn CommandStream>, DeviceError>>> =
        (0..spawned).map(|_| None).collect();
    for (offset, result) in receiver.iter() {
        recorded[offset] = Some(result);
    }

    if let Some(e) = spawn_error {
        return Err(e.into());
    }
    recorded
        .into_iter()
        .enumerate()
        .map(|(offset, result)| match result {
            Some(result) => result.map_err(RdgError::from),
            None => {
                #[cfg(feature = "logging")]
                log::error!("Worker recording span {} disconnected", first + offset);
                Err(RdgError::WorkerLost(first + offset))
            }
        })
        .collect()
}

///Physical resources of one execution.
#[derive(Default)]
struct Physical {
    ids: AHashMap<AnyHandle, ResourceId>,
    ///Transient and dedicated resources, destroyed after the graph.
    owned: Vec<ResourceId>,
    pooled: AHashMap<AnyHandle, Arc<PooledResource>>,
    pool_hits: u32,
    pool_misses: u32,
}

impl Physical {
    fn release(&mut self, device: &dyn Device) {
        for id in self.owned.drain(..) {
            device.destroy(id);
        }
        self.pooled.clear();
    }
}

fn to_transitions(
    registry: &Registry,
    ids: &AHashMap<AnyHandle, ResourceId>,
    planned: &[PlannedTransition],
) -> Vec<Transition> {
    planned
        .iter()
        .filter_map(|t| {
            let resource = *ids.get(&t.resource)?;
            let kind = registry.resource(t.resource)?.kind();
            Some(Transition {
                resource,
                kind,
                range: t.range,
                before: t.before,
                after: t.after,
            })
        })
        .collect()
}

impl<'rdg> CompiledGraph<'rdg> {
    fn create_resources(&mut self, physical: &mut Physical) -> Result<(), DeviceError> {
        for plan in &self.resources {
            if let Backing::External(source) = &plan.backing {
                physical.ids.insert(plan.handle, source.id());
            }
        }

        let device = self.rdg.device.clone();
        for pass in &self.passes {
            for handle in &pass.allocations {
                let (Some(res), Some(plan)) = (
                    self.registry.resource(*handle),
                    self.resource_index.get(handle).map(|i| &self.resources[*i]),
                ) else {
                    continue;
                };
                let placement = match plan.backing {
                    Backing::Transient { slot, size } => MemoryPlacement::Aliased { slot, size },
                    Backing::Dedicated => MemoryPlacement::Dedicated,
                    Backing::Pooled => {
                        let (pooled, hit) = self.rdg.pool.acquire(device.as_ref(), &res.desc, &res.name)?;
                        if hit {
                            physical.pool_hits += 1;
                        } else {
                            physical.pool_misses += 1;
                        }
                        physical.ids.insert(*handle, pooled.id());
                        physical.pooled.insert(*handle, pooled);
                        continue;
                    }
                    Backing::External(_) | Backing::Dead => continue,
                };

                let id = match &res.desc {
                    ResourceDesc::Texture(t) => device.create_texture(t, placement, &res.name)?,
                    ResourceDesc::Buffer(b) => device.create_buffer(b, placement, &res.name)?,
                };
                #[cfg(feature = "log_reasoning")]
                log::trace!("Created {} as {} ({:?})", res.name, id, placement);
                physical.ids.insert(*handle, id);
                physical.owned.push(id);
            }
        }
        Ok(())
    }

    fn build_work(&mut self, ids: &AHashMap<AnyHandle, ResourceId>) -> Vec<(SpanMode, SpanWork)> {
        let spans = self.spans.clone();
        let mut works = Vec::with_capacity(spans.len());
        for (span_idx, span) in spans.iter().enumerate() {
            let mut steps = Vec::new();
            let first = span.passes.first().copied();
            let last = span.passes.last().copied();

            for idx in span.passes.iter().copied() {
                self.pass_steps(idx, ids, &mut steps);
            }

            works.push((
                span.mode,
                SpanWork {
                    pipeline: span.pipeline,
                    name: format!("span{}-{}", span_idx, span.pipeline),
                    waits: first.map(|f| self.passes[f].waits.clone()).unwrap_or_default(),
                    steps,
                    signal: last.and_then(|l| self.passes[l].signal),
                },
            ));
        }
        works
    }

    fn pass_steps(&mut self, idx: PassIndex, ids: &AHashMap<AnyHandle, ResourceId>, steps: &mut Vec<Step>) {
        let batches = &self.batches;
        let registry = &self.registry;
        let collect = |list: &[usize]| {
            let planned = list
                .iter()
                .flat_map(|b| batches[*b].transitions.iter().copied())
                .collect::<Vec<_>>();
            to_transitions(registry, ids, &planned)
        };

        let pass = &self.passes[idx];
        let begin = collect(&pass.barriers.prologue_begin);
        let end = collect(&pass.barriers.prologue_end);
        let after = collect(&pass.barriers.epilogue_begin);
        if !begin.is_empty() {
            steps.push(Step::Begin(begin));
        }
        if !end.is_empty() {
            steps.push(Step::End(end));
        }

        let raster = pass.flags.contains(crate::PassFlags::RASTER);
        let opens_render_pass = raster && (pass.merge_group.is_none() || pass.prologue_pass == idx);
        let closes_render_pass = raster && (pass.merge_group.is_none() || pass.epilogue_pass == idx);
        if opens_render_pass {
            steps.push(Step::BeginRenderPass(pass.name.clone()));
        }

        if pass.handle.is_some() {
            let bindings = PassBindings {
                resources: pass
                    .bindings
                    .resources
                    .iter()
                    .filter_map(|h| ids.get(h).map(|id| (*h, *id)))
                    .collect(),
                views: pass
                    .bindings
                    .views
                    .iter()
                    .filter_map(|(view, parent, range)| ids.get(parent).map(|id| (*view, *id, *range)))
                    .collect(),
            };
            let name = pass.name.clone();
            steps.push(Step::Pass {
                name,
                execute: self.passes[idx].execute.take(),
                bindings,
            });
        }

        if closes_render_pass {
            steps.push(Step::EndRenderPass);
        }
        if !after.is_empty() {
            steps.push(Step::Begin(after));
        }
    }

    ///Records and submits every span in declaration order.
    ///
    /// Inline spans are recorded when the submission reaches them. A run of consecutive parallel spans is spawned on
    /// the workers once the submission reaches its first span and is waited for completely before anything else is
    /// recorded or submitted. Pass bodies of different runs therefore never overlap, and no worker still records when
    /// this returns, not even on error. Workers without parallelism record every span inline.
    fn submit(&self, works: Vec<(SpanMode, SpanWork)>) -> Result<usize, RdgError> {
        let device = self.rdg.device.clone();
        let workers = self.rdg.workers.clone();
        let concurrent = workers.parallelism() > 1;
        let count = works.len();

        let mut pending = works.into_iter().enumerate().peekable();
        while let Some((idx, (mode, work))) = pending.next() {
            if mode == SpanMode::Inline || !concurrent {
                let stream = record_span(device.as_ref(), work)?;
                #[cfg(feature = "logging")]
                log::trace!("Submitting {}", stream.name());
                device.submit(stream)?;
                continue;
            }

            let mut run = vec![(idx, work)];
            while let Some((next, (_, work))) =
                pending.next_if(|(_, (mode, _))| *mode == SpanMode::Parallel)
            {
                run.push((next, work));
            }
            for stream in record_run(&device, workers.as_ref(), run)? {
                #[cfg(feature = "logging")]
                log::trace!("Submitting {}", stream.name());
                device.submit(stream)?;
            }
        }
        Ok(count)
    }

    ///Creates the physical resources, records and submits every span and releases graph owned memory afterwards.
    ///
    /// Device failures abort the execution. Resources created up to that point are destroyed again.
    pub fn execute(mut self) -> Result<ExecutionReport, RdgError> {
        let device = self.rdg.device.clone();
        let mut physical = Physical::default();

        if let Err(e) = self.create_resources(&mut physical) {
            #[cfg(feature = "logging")]
            log::error!("Failed to create graph resources: {}", e);
            physical.release(device.as_ref());
            return Err(e.into());
        }

        let works = self.build_work(&physical.ids);
        let submitted = match self.submit(works) {
            Ok(count) => count,
            Err(e) => {
                #[cfg(feature = "logging")]
                log::error!("Graph execution failed: {}", e);
                physical.release(device.as_ref());
                return Err(e);
            }
        };

        for callback in self.post_execute.drain(..) {
            callback();
        }

        let mut report = ExecutionReport {
            executed_passes: self
                .passes
                .iter()
                .filter(|p| p.kept && p.handle.is_some())
                .map(|p| p.name.clone())
                .collect(),
            tracked_states: Vec::new(),
            submitted_spans: submitted,
        };

        for (handle, res) in self.registry.iter() {
            let states = self.final_states.get(&handle).cloned().unwrap_or_default();
            let source = match (&res.ownership, physical.pooled.get(&handle)) {
                (crate::resources::Ownership::External(source), _) => {
                    report.tracked_states.push((source.id(), states.clone()));
                    source.clone()
                }
                (_, Some(pooled)) => ExternalSource::Pooled(pooled.clone()),
                _ => continue,
            };
            if let Some(slot) = &res.extraction {
                slot.fill(ExtractedResource {
                    source,
                    desc: res.desc,
                    name: res.name.clone(),
                    states,
                });
            }
        }

        physical.release(device.as_ref());
        self.rdg.pool.tick(device.as_ref(), self.rdg.config.pool_timeout);
        self.session.pool_hits = physical.pool_hits;
        self.session.pool_misses = physical.pool_misses;

        #[cfg(feature = "logging")]
        log::trace!(
            "Executed {} passes in {} spans",
            report.executed_passes.len(),
            report.submitted_spans
        );
        Ok(report)
    }
}
