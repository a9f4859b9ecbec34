use std::{fmt::Display, sync::Arc};

use ahash::AHashMap;
use rdg_device::{
    Access, AccessState, BufferDesc, BufferUsage, Format, ResourceDesc, ResourceId,
    ResourceKind, SubresourceRange, SubresourceState, TextureDesc, TextureUsage,
};
use slotmap::SlotMap;

use crate::RdgError;

pub(crate) mod pool;
pub(crate) mod range_map;

pub use pool::{PooledResource, ResourcePool};

slotmap::new_key_type! {
    ///Handle of a texture declared in a graph. Only valid for the graph that created it.
    pub struct TextureHandle;
}
slotmap::new_key_type! {
    ///Handle of a buffer declared in a graph. Only valid for the graph that created it.
    pub struct BufferHandle;
}
slotmap::new_key_type! {
    ///Typed window onto a texture or buffer.
    pub struct ViewHandle;
}
slotmap::new_key_type! {
    ///Named group of view accesses that can be declared on a pass as a whole.
    pub struct BindingGroupHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnyHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

impl From<TextureHandle> for AnyHandle {
    fn from(h: TextureHandle) -> Self {
        AnyHandle::Texture(h)
    }
}

impl From<BufferHandle> for AnyHandle {
    fn from(h: BufferHandle) -> Self {
        AnyHandle::Buffer(h)
    }
}

impl Display for AnyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyHandle::Texture(t) => write!(f, "Texture({:?})", t),
            AnyHandle::Buffer(b) => write!(f, "Buffer({:?})", b),
        }
    }
}

///Who owns the physical backing of a resource.
#[derive(Debug, Clone)]
pub enum Ownership {
    ///Created by the graph. Decided to be transient or pooled while compiling.
    Graph,
    ///Borrowed from the caller. Never created or destroyed by the graph.
    External(ExternalSource),
}

#[derive(Debug, Clone)]
pub enum ExternalSource {
    Device(ResourceId),
    Pooled(Arc<PooledResource>),
}

impl ExternalSource {
    pub fn id(&self) -> ResourceId {
        match self {
            ExternalSource::Device(id) => *id,
            ExternalSource::Pooled(p) => p.id(),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u8 {
        ///Never alias the resource with others, allocate it from the pool instead.
        const FORCE_NON_TRANSIENT = 1 << 0;
    }
}

pub(crate) type DeferredSize = Box<dyn FnOnce() -> u64 + Send + 'static>;

///Graph side state of a texture or buffer.
pub(crate) struct GraphResource {
    pub name: String,
    pub desc: ResourceDesc,
    pub ownership: Ownership,
    pub flags: ResourceFlags,
    ///Known state when entering the graph. Graph resources start unknown.
    pub initial_states: Vec<(SubresourceRange, SubresourceState)>,
    pub extraction: Option<crate::ExtractionSlot>,
    ///State the resource must be in when the graph finishes.
    pub final_access: Option<Access>,
    ///Buffer whose element count is committed later.
    pub deferred: bool,
    pub size_callback: Option<DeferredSize>,
}

impl GraphResource {
    fn new(name: &str, desc: ResourceDesc, ownership: Ownership) -> Self {
        GraphResource {
            name: name.to_owned(),
            desc,
            ownership,
            flags: ResourceFlags::empty(),
            initial_states: Vec::new(),
            extraction: None,
            final_access: None,
            deferred: false,
            size_callback: None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.ownership, Ownership::External(_))
    }

    ///True if the resource must stay valid after the graph finished.
    pub fn outlives_graph(&self) -> bool {
        self.is_external() || self.extraction.is_some()
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.desc {
            ResourceDesc::Texture(t) => ResourceKind::Texture(t.format),
            ResourceDesc::Buffer(_) => ResourceKind::Buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewDesc {
    pub kind: ViewKind,
    pub range: SubresourceRange,
    ///Reinterpretation of the texture's format, if any.
    pub format: Option<Format>,
}

impl TextureViewDesc {
    pub fn read_only(range: SubresourceRange) -> Self {
        TextureViewDesc {
            kind: ViewKind::ReadOnly,
            range,
            format: None,
        }
    }

    pub fn read_write(range: SubresourceRange) -> Self {
        TextureViewDesc {
            kind: ViewKind::ReadWrite,
            range,
            format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphView {
    pub parent: AnyHandle,
    pub kind: ViewKind,
    pub range: SubresourceRange,
    pub format: Option<Format>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingEntry {
    pub view: ViewHandle,
    pub access: Access,
}

pub(crate) struct BindingGroup {
    pub name: String,
    pub entries: Vec<BindingEntry>,
}

///Handle indexed arenas of everything a graph declares.
#[derive(Default)]
pub(crate) struct Registry {
    pub textures: SlotMap<TextureHandle, GraphResource>,
    pub buffers: SlotMap<BufferHandle, GraphResource>,
    pub views: SlotMap<ViewHandle, GraphView>,
    pub groups: SlotMap<BindingGroupHandle, BindingGroup>,
    ///Deduplicates external registrations by device handle.
    external: AHashMap<ResourceId, AnyHandle>,
}

impl Registry {
    pub fn resource(&self, handle: AnyHandle) -> Option<&GraphResource> {
        match handle {
            AnyHandle::Texture(t) => self.textures.get(t),
            AnyHandle::Buffer(b) => self.buffers.get(b),
        }
    }

    pub fn resource_mut(&mut self, handle: AnyHandle) -> Option<&mut GraphResource> {
        match handle {
            AnyHandle::Texture(t) => self.textures.get_mut(t),
            AnyHandle::Buffer(b) => self.buffers.get_mut(b),
        }
    }

    pub fn get(&self, handle: AnyHandle) -> Result<&GraphResource, RdgError> {
        self.resource(handle)
            .ok_or(RdgError::UnknownResource(handle.to_string()))
    }

    pub fn get_mut(&mut self, handle: AnyHandle) -> Result<&mut GraphResource, RdgError> {
        self.resource_mut(handle)
            .ok_or(RdgError::UnknownResource(handle.to_string()))
    }

    ///All resources, textures first, each in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (AnyHandle, &GraphResource)> + '_ {
        self.textures
            .iter()
            .map(|(h, r)| (AnyHandle::Texture(h), r))
            .chain(self.buffers.iter().map(|(h, r)| (AnyHandle::Buffer(h), r)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (AnyHandle, &mut GraphResource)> + '_ {
        self.textures
            .iter_mut()
            .map(|(h, r)| (AnyHandle::Texture(h), r))
            .chain(
                self.buffers
                    .iter_mut()
                    .map(|(h, r)| (AnyHandle::Buffer(h), r)),
            )
    }

    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    pub fn create_texture(
        &mut self,
        desc: TextureDesc,
        name: &str,
    ) -> Result<TextureHandle, RdgError> {
        desc.validate()
            .map_err(|reason| RdgError::InvalidDescriptor {
                name: name.to_owned(),
                reason,
            })?;
        Ok(self.textures.insert(GraphResource::new(
            name,
            ResourceDesc::Texture(desc),
            Ownership::Graph,
        )))
    }

    pub fn create_buffer(
        &mut self,
        desc: BufferDesc,
        name: &str,
        deferred: bool,
    ) -> Result<BufferHandle, RdgError> {
        let validated = if deferred {
            desc.validate_layout()
        } else {
            desc.validate()
        };
        validated.map_err(|reason| RdgError::InvalidDescriptor {
            name: name.to_owned(),
            reason,
        })?;

        let mut res = GraphResource::new(name, ResourceDesc::Buffer(desc), Ownership::Graph);
        res.deferred = deferred;
        Ok(self.buffers.insert(res))
    }

    ///Registers an external resource. Returns the existing handle if `source` was registered before.
    pub fn register_external(
        &mut self,
        source: ExternalSource,
        desc: ResourceDesc,
        states: Vec<(SubresourceRange, SubresourceState)>,
        name: &str,
    ) -> Result<AnyHandle, RdgError> {
        let id = source.id();
        if let Some(existing) = self.external.get(&id) {
            let matches = matches!(
                (existing, &desc),
                (AnyHandle::Texture(_), ResourceDesc::Texture(_))
                    | (AnyHandle::Buffer(_), ResourceDesc::Buffer(_))
            );
            if !matches {
                return Err(RdgError::ExternalKindMismatch(id));
            }
            return Ok(*existing);
        }

        match &desc {
            ResourceDesc::Texture(t) => t.validate(),
            ResourceDesc::Buffer(b) => b.validate(),
        }
        .map_err(|reason| RdgError::InvalidDescriptor {
            name: name.to_owned(),
            reason,
        })?;

        //Resources enter the graph on the graphics pipeline.
        let states = states
            .into_iter()
            .map(|(range, state)| {
                let state = match state {
                    SubresourceState::Known(s) => {
                        SubresourceState::Known(AccessState::graphics(s.access))
                    }
                    SubresourceState::Unknown => SubresourceState::Unknown,
                };
                (range, state)
            })
            .collect();

        let mut res = GraphResource::new(name, desc, Ownership::External(source));
        res.initial_states = states;
        let handle = match desc {
            ResourceDesc::Texture(_) => AnyHandle::Texture(self.textures.insert(res)),
            ResourceDesc::Buffer(_) => AnyHandle::Buffer(self.buffers.insert(res)),
        };
        self.external.insert(id, handle);
        Ok(handle)
    }

    pub fn find_external(&self, id: ResourceId) -> Option<AnyHandle> {
        self.external.get(&id).copied()
    }

    pub fn create_view(
        &mut self,
        parent: AnyHandle,
        kind: ViewKind,
        range: SubresourceRange,
        format: Option<Format>,
    ) -> Result<ViewHandle, RdgError> {
        let res = self.get(parent)?;
        let invalid = |reason: &str| RdgError::InvalidView {
            resource: res.name.clone(),
            reason: reason.to_owned(),
        };

        let whole = res.desc.whole_range();
        if range.is_empty() || !whole.contains(&range) {
            return Err(invalid("range is empty or outside of the resource"));
        }
        let usable = match (&res.desc, kind) {
            (ResourceDesc::Texture(t), ViewKind::ReadOnly) => t
                .usage
                .intersects(TextureUsage::SAMPLED | TextureUsage::DEPTH_STENCIL),
            (ResourceDesc::Texture(t), ViewKind::ReadWrite) => {
                t.usage.contains(TextureUsage::STORAGE)
            }
            (ResourceDesc::Buffer(b), ViewKind::ReadOnly) => b.usage.intersects(
                BufferUsage::SHADER_READ | BufferUsage::STORAGE | BufferUsage::UNIFORM,
            ),
            (ResourceDesc::Buffer(b), ViewKind::ReadWrite) => {
                b.usage.contains(BufferUsage::STORAGE)
            }
        };
        if !usable {
            return Err(invalid("usage flags do not allow this view kind"));
        }
        if let (ResourceDesc::Texture(t), Some(f)) = (&res.desc, format) {
            if f.bytes_per_texel() != t.format.bytes_per_texel() || f.is_depth() != t.format.is_depth() {
                return Err(invalid("format is not compatible with the texture's format"));
            }
        }

        Ok(self.views.insert(GraphView {
            parent,
            kind,
            range,
            format,
        }))
    }

    pub fn view(&self, view: ViewHandle) -> Result<&GraphView, RdgError> {
        self.views
            .get(view)
            .ok_or(RdgError::UnknownResource(format!("View({:?})", view)))
    }

    pub fn create_binding_group(
        &mut self,
        name: &str,
        entries: Vec<BindingEntry>,
    ) -> Result<BindingGroupHandle, RdgError> {
        for entry in &entries {
            self.view(entry.view)?;
        }
        Ok(self.groups.insert(BindingGroup {
            name: name.to_owned(),
            entries,
        }))
    }
}
