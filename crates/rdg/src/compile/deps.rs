use ahash::AHashMap;

use super::{CompiledPass, PROLOGUE, PassIndex};
use crate::{
    PassFlags,
    resources::{AnyHandle, Registry, range_map::RangeMap},
};

///Connects every access to the last overlapping write before it. Writes become the producer of their range.
///
/// The epilogue additionally depends on every `NEVER_CULL` pass, which makes those roots of the culling walk.
pub(crate) fn build_dependencies(passes: &mut [CompiledPass], registry: &Registry) {
    let mut producers: AHashMap<AnyHandle, RangeMap<Option<PassIndex>>> = AHashMap::default();
    let epilogue = passes.len() - 1;

    for idx in 0..passes.len() {
        let mut dependencies = Vec::new();
        for access in &passes[idx].accesses {
            let Some(res) = registry.resource(access.resource) else {
                continue;
            };
            let map = producers
                .entry(access.resource)
                .or_insert_with(|| RangeMap::new(res.desc.whole_range(), None));

            dependencies.extend(map.overlapping(access.range).filter_map(|(_, p)| *p));
            if access.access.is_writable() {
                map.set(access.range, Some(idx));
            }
        }

        if idx == epilogue {
            dependencies.extend(
                passes
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.flags.contains(PassFlags::NEVER_CULL))
                    .map(|(i, _)| i),
            );
        }

        dependencies.retain(|d| *d != idx);
        dependencies.sort_unstable();
        dependencies.dedup();
        passes[idx].dependencies = dependencies;
    }
}

///Marks every pass the epilogue transitively depends on as kept. The prologue is always kept.
pub(crate) fn cull(passes: &mut [CompiledPass], cull_passes: bool) {
    if !cull_passes {
        for pass in passes.iter_mut() {
            pass.kept = true;
        }
        return;
    }

    let epilogue = passes.len() - 1;
    let mut worklist = vec![epilogue];
    while let Some(idx) = worklist.pop() {
        if passes[idx].kept {
            continue;
        }
        passes[idx].kept = true;
        worklist.extend(
            passes[idx]
                .dependencies
                .iter()
                .copied()
                .filter(|d| !passes[*d].kept),
        );
    }
    passes[PROLOGUE].kept = true;

    #[cfg(feature = "log_reasoning")]
    for pass in passes.iter().filter(|p| !p.kept) {
        log::trace!(
            "Culling {}: no path to an extracted resource or a NEVER_CULL pass",
            pass.name
        );
    }
}
