use rdg_device::{
    Access, BufferUsage, DescriptorError, ResourceDesc, SubresourceRange, TextureUsage,
};

use super::{PassBindingDecl, ResolvedAccess};
use crate::{
    PassFlags, RdgError,
    commit::{CommitOp, CommitQueue},
    pass::{AccessKind, AccessTarget, PassNode},
    resources::{AnyHandle, Registry, ViewKind, range_map::RangeMap},
};

const TEXTURE_USAGE: &[(Access, TextureUsage)] = &[
    (Access::CPU_READ, TextureUsage::CPU_READBACK),
    (Access::PRESENT, TextureUsage::PRESENT),
    (Access::SRV_COMPUTE, TextureUsage::SAMPLED),
    (Access::SRV_GRAPHICS, TextureUsage::SAMPLED),
    (Access::COPY_SRC, TextureUsage::COPY_SRC),
    (Access::RESOLVE_SRC, TextureUsage::RENDER_TARGET),
    (Access::DSV_READ, TextureUsage::DEPTH_STENCIL),
    (Access::UAV_COMPUTE, TextureUsage::STORAGE),
    (Access::UAV_GRAPHICS, TextureUsage::STORAGE),
    (Access::RTV, TextureUsage::RENDER_TARGET),
    (Access::COPY_DEST, TextureUsage::COPY_DST),
    (Access::RESOLVE_DST, TextureUsage::RENDER_TARGET),
    (Access::DSV_WRITE, TextureUsage::DEPTH_STENCIL),
];

const BUFFER_USAGE: &[(Access, BufferUsage)] = &[
    (Access::CPU_READ, BufferUsage::CPU_READBACK),
    (Access::INDIRECT_ARGS, BufferUsage::INDIRECT),
    (
        Access::VERTEX_OR_INDEX,
        BufferUsage::VERTEX.union(BufferUsage::INDEX),
    ),
    (
        Access::SRV_COMPUTE,
        BufferUsage::SHADER_READ
            .union(BufferUsage::UNIFORM)
            .union(BufferUsage::STORAGE),
    ),
    (
        Access::SRV_GRAPHICS,
        BufferUsage::SHADER_READ
            .union(BufferUsage::UNIFORM)
            .union(BufferUsage::STORAGE),
    ),
    (Access::COPY_SRC, BufferUsage::COPY_SRC),
    (Access::UAV_COMPUTE, BufferUsage::STORAGE),
    (Access::UAV_GRAPHICS, BufferUsage::STORAGE),
    (Access::COPY_DEST, BufferUsage::COPY_DST),
];

///Applies committed buffer sizes and size callbacks. Afterwards every descriptor is final.
pub(crate) fn finalize_descriptors(
    registry: &mut Registry,
    commit: &CommitQueue,
) -> Result<(), RdgError> {
    for op in commit.drain() {
        match op {
            CommitOp::BufferSize {
                buffer,
                element_count,
            } => {
                let res = registry.get_mut(buffer.into())?;
                if !res.deferred {
                    #[cfg(feature = "logging")]
                    log::warn!("Ignoring size commit for {}, it was not created deferred", res.name);
                    continue;
                }
                if let ResourceDesc::Buffer(desc) = &mut res.desc {
                    desc.element_count = element_count;
                }
            }
        }
    }

    for (_handle, res) in registry.iter_mut() {
        if let Some(callback) = res.size_callback.take() {
            let count = callback();
            if let ResourceDesc::Buffer(desc) = &mut res.desc {
                desc.element_count = count;
            }
        }
        if res.deferred {
            if let ResourceDesc::Buffer(desc) = &res.desc {
                if desc.element_count == 0 {
                    return Err(RdgError::InvalidDescriptor {
                        name: res.name.clone(),
                        reason: DescriptorError::ZeroElements,
                    });
                }
                #[cfg(feature = "log_reasoning")]
                log::trace!("Deferred buffer {} resolved to {} elements", res.name, desc.element_count);
            }
        }
    }
    Ok(())
}

///Single access after views and binding groups were expanded.
struct Expanded {
    resource: AnyHandle,
    range: SubresourceRange,
    kind: AccessKind,
    access: Access,
    ordered: bool,
    view: Option<ViewKind>,
}

fn expand(registry: &Registry, node: &PassNode) -> Result<(Vec<Expanded>, PassBindingDecl), RdgError> {
    let mut expanded = Vec::with_capacity(node.declarations.accesses.len());
    let mut bindings = PassBindingDecl::default();

    for decl in &node.declarations.accesses {
        match decl.target {
            AccessTarget::Resource(resource) => {
                let whole = registry.get(resource)?.desc.whole_range();
                expanded.push(Expanded {
                    resource,
                    range: decl.range.unwrap_or(whole),
                    kind: decl.kind,
                    access: decl.access,
                    ordered: decl.ordered,
                    view: None,
                });
                bindings.add_resource(resource);
            }
            AccessTarget::View(view) => {
                let v = registry.view(view)?;
                let range = match decl.range {
                    Some(r) => r.intersection(&v.range).unwrap_or(SubresourceRange::new(0..0, 0..0)),
                    None => v.range,
                };
                expanded.push(Expanded {
                    resource: v.parent,
                    range,
                    kind: decl.kind,
                    access: decl.access,
                    ordered: decl.ordered,
                    view: Some(v.kind),
                });
                bindings.add_view(view, v.parent, v.range);
            }
        }
    }

    for group in &node.declarations.groups {
        let group = registry
            .groups
            .get(*group)
            .ok_or_else(|| RdgError::UnknownResource(format!("BindingGroup({:?})", group)))?;
        for entry in &group.entries {
            let v = registry.view(entry.view)?;
            expanded.push(Expanded {
                resource: v.parent,
                range: v.range,
                kind: if entry.access.is_writable() {
                    AccessKind::ReadWrite
                } else {
                    AccessKind::Read
                },
                access: entry.access,
                ordered: false,
                view: Some(v.kind),
            });
            bindings.add_view(entry.view, v.parent, v.range);
        }
    }

    Ok((expanded, bindings))
}

fn check_access(
    registry: &Registry,
    node: &PassNode,
    access: &Expanded,
) -> Result<(), RdgError> {
    let res = registry.get(access.resource)?;
    let invalid = |reason: &str| RdgError::InvalidAccess {
        pass: node.name.clone(),
        resource: res.name.clone(),
        access: access.access,
        reason: reason.to_owned(),
    };

    if access.access.is_empty() {
        return Err(invalid("access is empty"));
    }
    match access.kind {
        AccessKind::Read if access.access.is_writable() => {
            return Err(invalid("read declared with a writing access"));
        }
        AccessKind::Write | AccessKind::ReadWrite if !access.access.is_writable() => {
            return Err(invalid("write declared with a read-only access"));
        }
        _ => {}
    }
    if access.view == Some(ViewKind::ReadOnly) && access.access.is_writable() {
        return Err(invalid("writing through a read-only view"));
    }
    let whole = res.desc.whole_range();
    if access.range.is_empty() || !whole.contains(&access.range) {
        return Err(invalid("range is empty or outside of the resource"));
    }
    if node.flags.contains(PassFlags::ASYNC_COMPUTE) && access.access.intersects(Access::GRAPHICS_ONLY) {
        return Err(invalid("access is not available on the async compute pipeline"));
    }
    if node.flags.contains(PassFlags::COPY) && !Access::COPY_MASK.contains(access.access) {
        return Err(invalid("copy passes may only copy"));
    }

    let supported = match &res.desc {
        ResourceDesc::Texture(t) => check_usage(access.access, t.usage, TEXTURE_USAGE),
        ResourceDesc::Buffer(b) => check_usage(access.access, b.usage, BUFFER_USAGE),
    };
    if !supported {
        return Err(invalid("usage flags of the resource do not allow this access"));
    }

    Ok(())
}

fn check_usage<U: bitflags::Flags + Copy>(access: Access, usage: U, table: &[(Access, U)]) -> bool {
    let known = table.iter().fold(Access::empty(), |acc, (bit, _)| acc | *bit);
    if !known.contains(access) {
        return false;
    }
    table
        .iter()
        .filter(|(bit, _)| access.contains(*bit))
        .all(|(_, required)| usage.intersects(*required))
}

///Expands, checks and merges the declared accesses of a pass. The result holds at most one access per subresource.
pub(crate) fn resolve_pass(
    registry: &Registry,
    node: &PassNode,
    validation: bool,
) -> Result<(Vec<ResolvedAccess>, PassBindingDecl), RdgError> {
    let (expanded, bindings) = expand(registry, node)?;

    let mut merged: Vec<(AnyHandle, RangeMap<Option<Access>>)> = Vec::new();
    for access in &expanded {
        if validation {
            check_access(registry, node, access)?;
        }
        let idx = match merged.iter().position(|(h, _)| *h == access.resource) {
            Some(idx) => idx,
            None => {
                let whole = registry.get(access.resource)?.desc.whole_range();
                merged.push((access.resource, RangeMap::new(whole, None)));
                merged.len() - 1
            }
        };
        let map = &mut merged[idx].1;

        if validation && !access.ordered {
            for (isec, prev) in map.overlapping(access.range) {
                if let Some(prev) = prev {
                    if !prev.combines_with(&access.access) {
                        return Err(RdgError::ConflictingAccess {
                            pass: node.name.clone(),
                            resource: registry.get(access.resource)?.name.clone(),
                            range: isec,
                            first: *prev,
                            second: access.access,
                        });
                    }
                }
            }
        }
        map.update(access.range, |prev| {
            Some(prev.map_or(access.access, |p| p | access.access))
        });
    }

    let resolved = merged
        .iter()
        .flat_map(|(resource, map)| {
            map.iter().filter_map(move |(range, access)| {
                access.filter(|a| !a.is_empty()).map(|access| ResolvedAccess {
                    resource: *resource,
                    range,
                    access,
                })
            })
        })
        .collect();
    Ok((resolved, bindings))
}

#[cfg(test)]
mod tests {
    use rdg_device::{BufferDesc, Format, TextureDesc};

    use super::*;
    use crate::{commit::CommitQueue, pass::AccessDeclarations};

    fn node(name: &str, flags: PassFlags, declarations: AccessDeclarations) -> PassNode {
        PassNode {
            name: name.to_owned(),
            flags,
            declarations,
            execute: None,
        }
    }

    fn color_desc() -> TextureDesc {
        TextureDesc::texture_2d(
            64,
            64,
            Format::R8G8B8A8Unorm,
            TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET,
        )
        .with_mips(4)
    }

    #[test]
    fn reads_of_one_resource_merge() {
        let mut reg = Registry::default();
        let tex = reg.create_texture(color_desc(), "color").unwrap();
        let decl = AccessDeclarations::build(|d| {
            d.read_texture(tex, Access::SRV_GRAPHICS)
                .read_texture(tex, Access::SRV_COMPUTE);
        });
        let (resolved, bindings) =
            resolve_pass(&reg, &node("p", PassFlags::RASTER, decl), true).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].access, Access::SRV_GRAPHICS | Access::SRV_COMPUTE);
        assert_eq!(bindings.resources, vec![AnyHandle::Texture(tex)]);
    }

    #[test]
    fn overlapping_write_conflicts_unless_ordered() {
        let mut reg = Registry::default();
        let tex = reg.create_texture(color_desc(), "color").unwrap();
        let conflicting = AccessDeclarations::build(|d| {
            d.read_texture(tex, Access::SRV_GRAPHICS).render_target(tex, 0);
        });
        let err = resolve_pass(&reg, &node("p", PassFlags::RASTER, conflicting.clone()), true)
            .err()
            .unwrap();
        match err {
            RdgError::ConflictingAccess { range, .. } => assert_eq!(range, SubresourceRange::mip(0)),
            other => panic!("unexpected {other}"),
        }

        //mip chain generation style: read mip 0, write mip 1
        let disjoint = AccessDeclarations::build(|d| {
            d.texture_range(tex, SubresourceRange::mip(0), AccessKind::Read, Access::SRV_GRAPHICS)
                .render_target(tex, 1);
        });
        let (resolved, _) = resolve_pass(&reg, &node("p", PassFlags::RASTER, disjoint), true).unwrap();
        assert_eq!(resolved.len(), 2);

        let ordered = AccessDeclarations::build(|d| {
            d.read_texture(tex, Access::SRV_GRAPHICS).render_target(tex, 0).ordered();
        });
        let (resolved, _) = resolve_pass(&reg, &node("p", PassFlags::RASTER, ordered), true).unwrap();
        let mip0 = resolved
            .iter()
            .find(|a| a.range.contains(&SubresourceRange::mip(0)))
            .unwrap();
        assert_eq!(mip0.access, Access::SRV_GRAPHICS | Access::RTV);

        //without validation the union is taken silently
        assert!(resolve_pass(&reg, &node("p", PassFlags::RASTER, conflicting), false).is_ok());
    }

    #[test]
    fn usage_and_pipeline_checks() {
        let mut reg = Registry::default();
        let tex = reg.create_texture(color_desc(), "color").unwrap();
        let buf = reg
            .create_buffer(BufferDesc::new(4, 16, BufferUsage::STORAGE), "buf", false)
            .unwrap();

        let no_storage = AccessDeclarations::build(|d| {
            d.write_texture(tex, Access::UAV_COMPUTE);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::COMPUTE, no_storage), true),
            Err(RdgError::InvalidAccess { .. })
        ));

        let rtv_on_buffer = AccessDeclarations::build(|d| {
            d.write_buffer(buf, Access::RTV);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::RASTER, rtv_on_buffer), true),
            Err(RdgError::InvalidAccess { .. })
        ));

        let graphics_read_on_async = AccessDeclarations::build(|d| {
            d.read_texture(tex, Access::SRV_GRAPHICS);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::ASYNC_COMPUTE, graphics_read_on_async), true),
            Err(RdgError::InvalidAccess { .. })
        ));

        let uav_in_copy = AccessDeclarations::build(|d| {
            d.write_buffer(buf, Access::UAV_COMPUTE);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::COPY, uav_in_copy), true),
            Err(RdgError::InvalidAccess { .. })
        ));

        let wrong_kind = AccessDeclarations::build(|d| {
            d.read_buffer(buf, Access::UAV_COMPUTE);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::COMPUTE, wrong_kind), true),
            Err(RdgError::InvalidAccess { .. })
        ));

        let ok = AccessDeclarations::build(|d| {
            d.read_write_buffer(buf, Access::UAV_COMPUTE);
        });
        assert!(resolve_pass(&reg, &node("p", PassFlags::ASYNC_COMPUTE, ok), true).is_ok());
    }

    #[test]
    fn read_only_view_rejects_writes() {
        let mut reg = Registry::default();
        let buf = reg
            .create_buffer(BufferDesc::new(4, 16, BufferUsage::STORAGE), "buf", false)
            .unwrap();
        let view = reg
            .create_view(buf.into(), ViewKind::ReadOnly, SubresourceRange::WHOLE_BUFFER, None)
            .unwrap();
        let decl = AccessDeclarations::build(|d| {
            d.view(view, Access::UAV_COMPUTE);
        });
        assert!(matches!(
            resolve_pass(&reg, &node("p", PassFlags::COMPUTE, decl), true),
            Err(RdgError::InvalidAccess { .. })
        ));
    }

    #[test]
    fn deferred_sizes() {
        let mut reg = Registry::default();
        let queue = CommitQueue::default();
        let committed = reg
            .create_buffer(BufferDesc::new(4, 0, BufferUsage::STORAGE), "committed", true)
            .unwrap();
        let by_callback = reg
            .create_buffer(BufferDesc::new(4, 0, BufferUsage::STORAGE), "callback", true)
            .unwrap();
        reg.get_mut(by_callback.into()).unwrap().size_callback = Some(Box::new(|| 99));
        queue.sender().commit_buffer_size(committed, 10);
        queue.sender().commit_buffer_size(committed, 12);

        finalize_descriptors(&mut reg, &queue).unwrap();
        let count = |h: AnyHandle| match reg.get(h).unwrap().desc {
            ResourceDesc::Buffer(b) => b.element_count,
            _ => unreachable!(),
        };
        assert_eq!(count(committed.into()), 12);
        assert_eq!(count(by_callback.into()), 99);

        reg.create_buffer(BufferDesc::new(4, 0, BufferUsage::STORAGE), "never", true)
            .unwrap();
        assert!(matches!(
            finalize_descriptors(&mut reg, &queue),
            Err(RdgError::InvalidDescriptor {
                reason: DescriptorError::ZeroElements,
                ..
            })
        ));
    }
}
