use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use ahash::AHashMap;

use super::{CompiledPass, PassIndex};
use crate::{
    GraphSession, TransientConfig,
    resources::{AnyHandle, ExternalSource, Ownership, Registry, ResourceFlags},
};

///Where the physical memory of a resource comes from.
#[derive(Debug, Clone)]
pub enum Backing {
    ///Owned by the caller.
    External(ExternalSource),
    ///No kept pass touches the resource. Never allocated.
    Dead,
    ///Durable resource from the [ResourcePool](crate::ResourcePool).
    Pooled,
    ///Too big for every transient slot class. Own allocation, destroyed after the graph.
    Dedicated,
    ///Placed in transient slot `slot` of `size` bytes, possibly aliasing other resources.
    Transient { slot: u32, size: u64 },
}

impl Backing {
    pub fn is_transient(&self) -> bool {
        matches!(self, Backing::Transient { .. })
    }
}

impl Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::External(source) => write!(f, "external {}", source.id()),
            Backing::Dead => write!(f, "dead"),
            Backing::Pooled => write!(f, "pooled"),
            Backing::Dedicated => write!(f, "dedicated"),
            Backing::Transient { slot, size } => write!(f, "transient slot {slot} ({size} bytes)"),
        }
    }
}

///Lifetime and backing of a single resource.
#[derive(Debug, Clone)]
pub struct ResourcePlan {
    pub(crate) handle: AnyHandle,
    pub(crate) backing: Backing,
    pub(crate) first: Option<PassIndex>,
    pub(crate) last: Option<PassIndex>,
}

impl ResourcePlan {
    pub fn handle(&self) -> AnyHandle {
        self.handle
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    ///Pass at which the resource needs its memory. None for dead resources.
    pub fn first(&self) -> Option<PassIndex> {
        self.first
    }

    ///Pass after which the memory may be reused.
    pub fn last(&self) -> Option<PassIndex> {
        self.last
    }
}

///Memory slot shared by transient resources with disjoint lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientSlot {
    pub(crate) size: u64,
    pub(crate) occupants: Vec<AnyHandle>,
}

impl TransientSlot {
    pub fn size(&self) -> u64 {
        self.size
    }

    ///Resources placed in this slot, in allocation order.
    pub fn occupants(&self) -> &[AnyHandle] {
        &self.occupants
    }
}

pub(crate) struct Lifetimes {
    pub resources: Vec<ResourcePlan>,
    pub slots: Vec<TransientSlot>,
}

///Free slots per size, per pipeline. A slot is only handed to resources starting on the pipeline that released it,
/// since nothing orders the two pipelines otherwise.
type FreeSlots = [BTreeMap<u64, BTreeSet<u32>>; 2];

struct Candidate {
    plan: usize,
    first: PassIndex,
    last: PassIndex,
    first_access: PassIndex,
    last_access: PassIndex,
    class: u64,
}

///Computes first/last use of every resource, decides its backing and assigns transient slots.
///
/// First and last use are widened to the barrier passes of merge groups, so aliasing never happens within a
/// render pass. Resources that outlive the graph live until the epilogue.
pub(crate) fn plan(
    passes: &mut [CompiledPass],
    registry: &Registry,
    config: &TransientConfig,
    session: &mut GraphSession,
) -> Lifetimes {
    let epilogue = passes.len() - 1;
    let mut usage: AHashMap<AnyHandle, (PassIndex, PassIndex)> = AHashMap::default();
    for (idx, pass) in passes.iter().enumerate().filter(|(_, p)| p.kept) {
        for access in &pass.accesses {
            usage
                .entry(access.resource)
                .and_modify(|(_, last)| *last = idx)
                .or_insert((idx, idx));
        }
    }

    let mut resources = Vec::with_capacity(registry.len());
    let mut candidates = Vec::new();
    for (handle, res) in registry.iter() {
        let Some((first_access, last_access)) = usage.get(&handle).copied() else {
            #[cfg(feature = "log_reasoning")]
            log::trace!("{} is not used by any kept pass", res.name);
            let backing = match &res.ownership {
                Ownership::External(source) => Backing::External(source.clone()),
                Ownership::Graph => Backing::Dead,
            };
            resources.push(ResourcePlan {
                handle,
                backing,
                first: None,
                last: None,
            });
            continue;
        };

        let first = passes[first_access].prologue_pass;
        let last = if res.outlives_graph() {
            epilogue
        } else {
            passes[last_access].epilogue_pass
        };

        let backing = match &res.ownership {
            Ownership::External(source) => Backing::External(source.clone()),
            Ownership::Graph
                if res.extraction.is_some()
                    || res.flags.contains(ResourceFlags::FORCE_NON_TRANSIENT)
                    || !config.enabled =>
            {
                Backing::Pooled
            }
            Ownership::Graph => match config.size_class(res.desc.size_in_bytes()) {
                Some(class) => {
                    candidates.push(Candidate {
                        plan: resources.len(),
                        first,
                        last,
                        first_access,
                        last_access,
                        class,
                    });
                    //slot is assigned by the sweep below
                    Backing::Transient { slot: 0, size: class }
                }
                None => {
                    #[cfg(feature = "logging")]
                    log::warn!(
                        "{} ({} bytes) exceeds the largest transient slot class, using a dedicated allocation",
                        res.name,
                        res.desc.size_in_bytes()
                    );
                    session.transient_overflows += 1;
                    Backing::Dedicated
                }
            },
        };

        if !matches!(backing, Backing::External(_)) {
            passes[first].allocations.push(handle);
            passes[last].deallocations.push(handle);
        }
        resources.push(ResourcePlan {
            handle,
            backing,
            first: Some(first),
            last: Some(last),
        });
    }

    let slots = assign_slots(passes, &mut resources, &candidates, session);
    Lifetimes { resources, slots }
}

///Sweeps the passes in order. At every pass the resources starting there take a free slot (smallest fitting one
/// first), afterwards the resources ending there release theirs.
fn assign_slots(
    passes: &[CompiledPass],
    resources: &mut [ResourcePlan],
    candidates: &[Candidate],
    session: &mut GraphSession,
) -> Vec<TransientSlot> {
    let mut slots: Vec<TransientSlot> = Vec::new();
    let mut free: FreeSlots = Default::default();
    let mut assigned: Vec<u32> = vec![0; candidates.len()];

    for idx in 0..passes.len() {
        for (cidx, candidate) in candidates.iter().enumerate().filter(|(_, c)| c.first == idx) {
            let pipeline = passes[candidate.first_access].pipeline.index();
            let reuse = free[pipeline]
                .range(candidate.class..)
                .find_map(|(size, set)| set.first().map(|slot| (*size, *slot)));

            let slot = match reuse {
                Some((size, slot)) => {
                    if let Some(set) = free[pipeline].get_mut(&size) {
                        set.remove(&slot);
                        if set.is_empty() {
                            free[pipeline].remove(&size);
                        }
                    }
                    session.aliased_resources += 1;
                    #[cfg(feature = "log_reasoning")]
                    log::trace!(
                        "Resource {} aliases slot {} ({} bytes)",
                        resources[candidate.plan].handle,
                        slot,
                        size
                    );
                    slot
                }
                None => {
                    slots.push(TransientSlot {
                        size: candidate.class,
                        occupants: Vec::new(),
                    });
                    (slots.len() - 1) as u32
                }
            };
            slots[slot as usize].occupants.push(resources[candidate.plan].handle);
            resources[candidate.plan].backing = Backing::Transient {
                slot,
                size: slots[slot as usize].size,
            };
            assigned[cidx] = slot;
        }

        for (cidx, candidate) in candidates.iter().enumerate().filter(|(_, c)| c.last == idx) {
            let pipeline = passes[candidate.last_access].pipeline.index();
            let slot = assigned[cidx];
            free[pipeline]
                .entry(slots[slot as usize].size)
                .or_default()
                .insert(slot);
        }
    }

    session.transient_resources = candidates.len() as u32;
    session.transient_slots = slots.len() as u32;
    session.transient_bytes = slots.iter().map(|s| s.size).sum();
    slots
}

#[cfg(test)]
mod tests {
    use rdg_device::{
        Access, BufferDesc, BufferUsage, Pipeline, SubresourceRange,
    };

    use super::*;
    use crate::{PassFlags, compile::ResolvedAccess};

    const KIB: u64 = 1024;

    fn config() -> TransientConfig {
        TransientConfig {
            enabled: true,
            min_slot_size: 4 * KIB,
            max_slot_size: 64 * KIB,
        }
    }

    fn buffer(reg: &mut Registry, name: &str, bytes: u64) -> AnyHandle {
        reg.create_buffer(BufferDesc::new(1, bytes, BufferUsage::STORAGE), name, false)
            .unwrap()
            .into()
    }

    fn pass(idx: PassIndex, pipeline: Pipeline, touched: &[AnyHandle]) -> CompiledPass {
        let mut p = CompiledPass::new(idx, &format!("p{idx}"), PassFlags::COMPUTE, pipeline);
        p.kept = true;
        p.accesses = touched
            .iter()
            .map(|h| ResolvedAccess {
                resource: *h,
                range: SubresourceRange::WHOLE_BUFFER,
                access: Access::UAV_COMPUTE,
            })
            .collect();
        p
    }

    fn slot_of(lifetimes: &Lifetimes, handle: AnyHandle) -> u32 {
        match lifetimes.resources.iter().find(|r| r.handle == handle).unwrap().backing {
            Backing::Transient { slot, .. } => slot,
            ref other => panic!("not transient: {other}"),
        }
    }

    #[test]
    fn disjoint_lifetimes_share_a_slot() {
        let mut reg = Registry::default();
        let a = buffer(&mut reg, "a", 4 * KIB);
        let b = buffer(&mut reg, "b", 3 * KIB);
        let c = buffer(&mut reg, "c", 4 * KIB);
        let big = buffer(&mut reg, "big", 128 * KIB);
        let unused = buffer(&mut reg, "unused", KIB);

        let g = Pipeline::Graphics;
        let mut passes = vec![
            pass(0, g, &[]),
            pass(1, g, &[a]),
            pass(2, g, &[a, b]),
            pass(3, g, &[c, big]),
            pass(4, g, &[]),
        ];
        let mut session = GraphSession::new();
        let lifetimes = plan(&mut passes, &reg, &config(), &mut session);

        //a lives 1..=2, b 2..=2, c 3..=3
        assert_ne!(slot_of(&lifetimes, a), slot_of(&lifetimes, b));
        assert_eq!(slot_of(&lifetimes, c), slot_of(&lifetimes, a));
        assert_eq!(lifetimes.slots.len(), 2);
        assert_eq!(session.aliased_resources, 1);
        assert_eq!(session.transient_overflows, 1);

        let plan_of = |h| lifetimes.resources.iter().find(|r| r.handle == h).unwrap();
        assert!(matches!(plan_of(big).backing, Backing::Dedicated));
        assert!(matches!(plan_of(unused).backing, Backing::Dead));
        assert_eq!(plan_of(a).first, Some(1));
        assert_eq!(plan_of(a).last, Some(2));

        assert_eq!(passes[1].allocations, vec![a]);
        assert_eq!(passes[2].deallocations, vec![a, b]);
        assert!(!passes.iter().any(|p| p.allocations.contains(&unused)));
    }

    #[test]
    fn slots_do_not_cross_pipelines() {
        let mut reg = Registry::default();
        let a = buffer(&mut reg, "a", 4 * KIB);
        let b = buffer(&mut reg, "b", 4 * KIB);
        let mut passes = vec![
            pass(0, Pipeline::Graphics, &[]),
            pass(1, Pipeline::AsyncCompute, &[a]),
            pass(2, Pipeline::Graphics, &[b]),
            pass(3, Pipeline::Graphics, &[]),
        ];
        let lifetimes = plan(&mut passes, &reg, &config(), &mut GraphSession::new());
        assert_ne!(slot_of(&lifetimes, a), slot_of(&lifetimes, b));
    }

    #[test]
    fn no_overlapping_occupants() {
        let mut reg = Registry::default();
        let handles = (0..8)
            .map(|i| buffer(&mut reg, &format!("r{i}"), (i as u64 + 1) * 2 * KIB))
            .collect::<Vec<_>>();
        let g = Pipeline::Graphics;
        //staggered lifetimes of two passes each
        let mut passes = vec![pass(0, g, &[])];
        for idx in 1..=9 {
            let touched = handles
                .iter()
                .enumerate()
                .filter(|(i, _)| *i + 1 == idx || *i + 2 == idx)
                .map(|(_, h)| *h)
                .collect::<Vec<_>>();
            passes.push(pass(idx, g, &touched));
        }
        passes.push(pass(10, g, &[]));

        let lifetimes = plan(&mut passes, &reg, &config(), &mut GraphSession::new());
        for slot in &lifetimes.slots {
            let intervals = slot
                .occupants
                .iter()
                .map(|h| {
                    let p = lifetimes.resources.iter().find(|r| r.handle == *h).unwrap();
                    (p.first.unwrap(), p.last.unwrap())
                })
                .collect::<Vec<_>>();
            for (i, a) in intervals.iter().enumerate() {
                for b in intervals.iter().skip(i + 1) {
                    assert!(a.1 < b.0 || b.1 < a.0, "{a:?} overlaps {b:?}");
                }
            }
        }
        assert!(lifetimes.slots.len() < handles.len());
    }

    #[test]
    fn disabled_transients_use_the_pool() {
        let mut reg = Registry::default();
        let a = buffer(&mut reg, "a", KIB);
        let mut passes = vec![
            pass(0, Pipeline::Graphics, &[]),
            pass(1, Pipeline::Graphics, &[a]),
            pass(2, Pipeline::Graphics, &[]),
        ];
        let cfg = TransientConfig {
            enabled: false,
            ..config()
        };
        let lifetimes = plan(&mut passes, &reg, &cfg, &mut GraphSession::new());
        assert!(matches!(lifetimes.resources[0].backing, Backing::Pooled));
        assert!(lifetimes.slots.is_empty());
    }
}
