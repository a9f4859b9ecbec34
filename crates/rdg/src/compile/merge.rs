use rdg_device::Pipeline;

use super::{CompiledPass, PassIndex, ResolvedAccess};
use crate::PassFlags;

fn is_candidate(pass: &CompiledPass) -> bool {
    pass.kept
        && pass.pipeline == Pipeline::Graphics
        && pass.flags.contains(PassFlags::RASTER)
        && !pass
            .flags
            .intersects(PassFlags::SKIP_MERGE | PassFlags::NEVER_PARALLEL)
        && pass.accesses.iter().any(|a| a.is_attachment())
}

fn attachments(pass: &CompiledPass) -> impl Iterator<Item = &ResolvedAccess> + '_ {
    pass.accesses.iter().filter(|a| a.is_attachment())
}

fn same_attachments(a: &CompiledPass, b: &CompiledPass) -> bool {
    attachments(a).count() == attachments(b).count()
        && attachments(a).all(|x| attachments(b).any(|y| x == y))
}

///A pass joins a group if it binds the same attachments and every access that overlaps an access of a member is
/// identical to it. Anything else would need a transition inside the render pass.
fn can_join(passes: &[CompiledPass], group: &[PassIndex], candidate: PassIndex) -> bool {
    let pass = &passes[candidate];
    if !same_attachments(&passes[group[0]], pass) {
        return false;
    }
    group.iter().all(|member| {
        passes[*member].accesses.iter().all(|b| {
            pass.accesses.iter().all(|a| {
                a.resource != b.resource || !a.range.overlaps(&b.range) || a.access == b.access
            })
        })
    })
}

///Groups consecutive kept raster passes into render passes. Returns the number of passes that ended up in a group.
///
/// Barriers of group members are recorded by the first member (prologue) and the last member (epilogue).
pub(crate) fn merge_render_passes(passes: &mut [CompiledPass]) -> u32 {
    let mut groups: Vec<Vec<PassIndex>> = Vec::new();
    let mut current: Vec<PassIndex> = Vec::new();

    for idx in 0..passes.len() {
        //culled passes vanish from the schedule and do not break a group
        if !passes[idx].kept {
            continue;
        }
        if !is_candidate(&passes[idx]) {
            groups.push(std::mem::take(&mut current));
            continue;
        }
        if !current.is_empty() && !can_join(passes, &current, idx) {
            #[cfg(feature = "log_reasoning")]
            log::trace!("{} can't join the render pass of {}", passes[idx].name, passes[current[0]].name);
            groups.push(std::mem::take(&mut current));
        }
        current.push(idx);
    }
    groups.push(current);

    let mut merged = 0;
    let mut group_id = 0;
    for group in groups.into_iter().filter(|g| g.len() >= 2) {
        let (first, last) = (group[0], group[group.len() - 1]);
        #[cfg(feature = "log_reasoning")]
        log::trace!(
            "Merging {} passes into render pass group {} starting at {}",
            group.len(),
            group_id,
            passes[first].name
        );
        for idx in &group {
            passes[*idx].merge_group = Some(group_id);
            passes[*idx].prologue_pass = first;
            passes[*idx].epilogue_pass = last;
        }
        merged += group.len() as u32;
        group_id += 1;
    }
    merged
}
