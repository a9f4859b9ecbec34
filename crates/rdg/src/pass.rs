use std::fmt::Display;

use bitflags::bitflags;
use rdg_device::{Access, CommandStream, Pipeline, ResourceId, SubresourceRange};

use crate::resources::{AnyHandle, BindingGroupHandle, BufferHandle, TextureHandle, ViewHandle};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassFlags: u16 {
        ///Draws into render targets within a hardware render pass. Candidate for render pass merging.
        const RASTER = 1 << 0;
        ///Compute work on the graphics pipeline.
        const COMPUTE = 1 << 1;
        ///Compute work on the async compute pipeline.
        const ASYNC_COMPUTE = 1 << 2;
        ///Only copies. Restricts accesses to copy source and destination.
        const COPY = 1 << 3;
        ///Pass has side effects outside of the graph and is never culled.
        const NEVER_CULL = 1 << 4;
        ///Never merge this pass with its neighbours into one render pass.
        const SKIP_MERGE = 1 << 5;
        ///Record this pass inline on the executing thread.
        const NEVER_PARALLEL = 1 << 6;
    }
}

impl PassFlags {
    ///Returns false for combinations that can't be executed.
    pub fn is_valid(&self) -> bool {
        let async_compute = self.contains(PassFlags::ASYNC_COMPUTE);
        let raster = self.contains(PassFlags::RASTER);
        let copy = self.contains(PassFlags::COPY);
        !(async_compute && (raster || copy)) && !(raster && copy)
    }
}

///Index of a pass in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(pub(crate) u32);

impl PassHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for PassHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTarget {
    Resource(AnyHandle),
    View(ViewHandle),
}

///Single access as written down by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclaredAccess {
    pub target: AccessTarget,
    ///Range of the access. None means the whole resource (or the view's range).
    pub range: Option<SubresourceRange>,
    pub kind: AccessKind,
    pub access: Access,
    ///The pass body orders this access after the earlier, overlapping ones itself.
    pub ordered: bool,
}

///Fixed list of resource accesses a pass declares. Filled by [PassParameters::declare].
#[derive(Debug, Clone, Default)]
pub struct AccessDeclarations {
    pub(crate) accesses: Vec<DeclaredAccess>,
    pub(crate) groups: Vec<BindingGroupHandle>,
}

impl AccessDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    ///Builds a declaration list in place.
    pub fn build(f: impl FnOnce(&mut AccessDeclarations)) -> Self {
        let mut decl = Self::new();
        f(&mut decl);
        decl
    }

    pub fn accesses(&self) -> &[DeclaredAccess] {
        &self.accesses
    }

    fn push(
        &mut self,
        target: AccessTarget,
        range: Option<SubresourceRange>,
        kind: AccessKind,
        access: Access,
    ) -> &mut Self {
        self.accesses.push(DeclaredAccess {
            target,
            range,
            kind,
            access,
            ordered: false,
        });
        self
    }

    pub fn texture(&mut self, texture: TextureHandle, kind: AccessKind, access: Access) -> &mut Self {
        self.push(AccessTarget::Resource(texture.into()), None, kind, access)
    }

    pub fn texture_range(
        &mut self,
        texture: TextureHandle,
        range: SubresourceRange,
        kind: AccessKind,
        access: Access,
    ) -> &mut Self {
        self.push(AccessTarget::Resource(texture.into()), Some(range), kind, access)
    }

    pub fn read_texture(&mut self, texture: TextureHandle, access: Access) -> &mut Self {
        self.texture(texture, AccessKind::Read, access)
    }

    pub fn write_texture(&mut self, texture: TextureHandle, access: Access) -> &mut Self {
        self.texture(texture, AccessKind::Write, access)
    }

    pub fn read_write_texture(&mut self, texture: TextureHandle, access: Access) -> &mut Self {
        self.texture(texture, AccessKind::ReadWrite, access)
    }

    ///Binds `mip` of `texture` as color attachment.
    pub fn render_target(&mut self, texture: TextureHandle, mip: u32) -> &mut Self {
        self.texture_range(
            texture,
            SubresourceRange::mip(mip),
            AccessKind::Write,
            Access::RTV,
        )
    }

    pub fn depth_stencil(&mut self, texture: TextureHandle, write: bool) -> &mut Self {
        if write {
            self.texture(texture, AccessKind::ReadWrite, Access::DSV_WRITE)
        } else {
            self.texture(texture, AccessKind::Read, Access::DSV_READ)
        }
    }

    pub fn buffer(&mut self, buffer: BufferHandle, kind: AccessKind, access: Access) -> &mut Self {
        self.push(AccessTarget::Resource(buffer.into()), None, kind, access)
    }

    pub fn read_buffer(&mut self, buffer: BufferHandle, access: Access) -> &mut Self {
        self.buffer(buffer, AccessKind::Read, access)
    }

    pub fn write_buffer(&mut self, buffer: BufferHandle, access: Access) -> &mut Self {
        self.buffer(buffer, AccessKind::Write, access)
    }

    pub fn read_write_buffer(&mut self, buffer: BufferHandle, access: Access) -> &mut Self {
        self.buffer(buffer, AccessKind::ReadWrite, access)
    }

    ///Access through a view. The kind follows from `access`.
    pub fn view(&mut self, view: ViewHandle, access: Access) -> &mut Self {
        let kind = if access.is_writable() {
            AccessKind::ReadWrite
        } else {
            AccessKind::Read
        };
        self.push(AccessTarget::View(view), None, kind, access)
    }

    ///Declares every entry of the binding group.
    pub fn binding_group(&mut self, group: BindingGroupHandle) -> &mut Self {
        self.groups.push(group);
        self
    }

    ///Marks the last declared access as ordered by the pass body. Overlapping writes within one pass are only
    /// accepted if the later one is ordered.
    pub fn ordered(&mut self) -> &mut Self {
        if let Some(last) = self.accesses.last_mut() {
            last.ordered = true;
        }
        self
    }
}

///Parameter struct of a pass. Enumerates every resource the pass touches through a fixed layout.
pub trait PassParameters: Send + 'static {
    fn declare(&self, decl: &mut AccessDeclarations);
}

impl PassParameters for () {
    fn declare(&self, _decl: &mut AccessDeclarations) {}
}

impl PassParameters for AccessDeclarations {
    fn declare(&self, decl: &mut AccessDeclarations) {
        decl.accesses.extend_from_slice(&self.accesses);
        decl.groups.extend_from_slice(&self.groups);
    }
}

pub(crate) type ExecuteFn = Box<dyn FnOnce(&mut PassContext<'_>) + Send + 'static>;

pub(crate) struct PassNode {
    pub name: String,
    pub flags: PassFlags,
    pub declarations: AccessDeclarations,
    pub execute: Option<ExecuteFn>,
}

///Physical resources a pass body may resolve. Only declared resources are present.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassBindings {
    pub resources: Vec<(AnyHandle, ResourceId)>,
    pub views: Vec<(ViewHandle, ResourceId, SubresourceRange)>,
}

///Everything a pass body sees while it is recorded.
pub struct PassContext<'a> {
    pub(crate) stream: &'a mut dyn CommandStream,
    pub(crate) bindings: &'a PassBindings,
    pub(crate) name: &'a str,
}

impl<'a> PassContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn pipeline(&self) -> Pipeline {
        self.stream.pipeline()
    }

    pub fn stream(&mut self) -> &mut dyn CommandStream {
        &mut *self.stream
    }

    ///Returns the backend stream if it is of type `T`.
    pub fn stream_as<T: 'static>(&mut self) -> Option<&mut T> {
        self.stream.as_any_mut().downcast_mut::<T>()
    }

    fn resource(&self, handle: AnyHandle) -> Option<ResourceId> {
        self.bindings
            .resources
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, id)| *id)
    }

    ///Physical texture, if the pass declared an access to it.
    pub fn texture(&self, texture: TextureHandle) -> Option<ResourceId> {
        self.resource(texture.into())
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<ResourceId> {
        self.resource(buffer.into())
    }

    ///Physical resource and range of a declared view.
    pub fn view(&self, view: ViewHandle) -> Option<(ResourceId, SubresourceRange)> {
        self.bindings
            .views
            .iter()
            .find(|(v, _, _)| *v == view)
            .map(|(_, id, range)| (*id, *range))
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    #[test]
    fn flag_combinations() {
        assert!(PassFlags::RASTER.is_valid());
        assert!((PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL).is_valid());
        assert!(!(PassFlags::ASYNC_COMPUTE | PassFlags::RASTER).is_valid());
        assert!(!(PassFlags::ASYNC_COMPUTE | PassFlags::COPY).is_valid());
        assert!(!(PassFlags::RASTER | PassFlags::COPY).is_valid());
    }

    #[test]
    fn declarations_replay() {
        let mut textures: SlotMap<TextureHandle, ()> = SlotMap::with_key();
        let a = textures.insert(());
        let b = textures.insert(());

        let params = AccessDeclarations::build(|d| {
            d.render_target(a, 0)
                .read_texture(b, Access::SRV_GRAPHICS)
                .write_texture(b, Access::UAV_GRAPHICS)
                .ordered();
        });

        let mut replayed = AccessDeclarations::new();
        params.declare(&mut replayed);
        assert_eq!(replayed.accesses().len(), 3);
        assert_eq!(replayed.accesses()[0].access, Access::RTV);
        assert_eq!(replayed.accesses()[0].range, Some(SubresourceRange::mip(0)));
        assert!(!replayed.accesses()[1].ordered);
        assert!(replayed.accesses()[2].ordered);
    }
}
