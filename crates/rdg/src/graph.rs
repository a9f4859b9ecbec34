use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use rdg_device::{
    Access, AccessState, BufferDesc, Device, ResourceDesc, ResourceId, SubresourceRange,
    SubresourceState, TextureDesc, Workers,
};

use crate::{
    GraphSession, RdgConfig, RdgError,
    commit::{CommitQueue, CommitSender},
    compile::CompiledGraph,
    execute::ExecutionReport,
    pass::{AccessDeclarations, AccessTarget, PassContext, PassFlags, PassHandle, PassNode, PassParameters},
    resources::{
        AnyHandle, BindingEntry, BindingGroupHandle, BufferHandle, ExternalSource,
        PooledResource, Registry, ResourceFlags, ResourcePool, TextureHandle, TextureViewDesc,
        ViewHandle, ViewKind,
    },
};

///Long living render graph context. Owns the device, the workers, the configuration and the pooled resources that
/// survive single graphs.
pub struct Rdg {
    pub device: Arc<dyn Device>,
    pub workers: Arc<dyn Workers>,
    pub config: RdgConfig,
    pub(crate) pool: ResourcePool,
}

impl Rdg {
    pub fn new(device: Arc<dyn Device>, workers: Arc<dyn Workers>, config: RdgConfig) -> Self {
        Rdg {
            device,
            workers,
            config,
            pool: ResourcePool::new(),
        }
    }

    ///Starts recording a new graph. `session` is reset and receives the statistics of this graph.
    pub fn record<'rdg>(&'rdg mut self, session: &'rdg mut GraphSession) -> RenderGraph<'rdg> {
        session.reset();
        RenderGraph {
            rdg: self,
            session,
            registry: Registry::default(),
            passes: Vec::new(),
            setup_tasks: Vec::new(),
            commit: CommitQueue::default(),
            post_execute: Vec::new(),
        }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    ///Destroys every pooled resource that is not in use.
    pub fn clear_pool(&mut self) {
        self.pool.clear(self.device.as_ref());
    }
}

///Resource handed out of a graph via [RenderGraph::queue_extraction]. Keeps the physical resource alive (and out of
/// the pool) until dropped, and can be registered again in a later graph.
#[derive(Debug, Clone)]
pub struct ExtractedResource {
    pub(crate) source: ExternalSource,
    pub(crate) desc: ResourceDesc,
    pub(crate) name: String,
    pub(crate) states: Vec<(SubresourceRange, SubresourceState)>,
}

impl ExtractedResource {
    pub fn id(&self) -> ResourceId {
        self.source.id()
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    ///Access state of every subresource after the graph finished.
    pub fn states(&self) -> &[(SubresourceRange, SubresourceState)] {
        &self.states
    }

    ///The pooled resource backing this, if the graph created it.
    pub fn pooled(&self) -> Option<&Arc<PooledResource>> {
        match &self.source {
            ExternalSource::Pooled(p) => Some(p),
            ExternalSource::Device(_) => None,
        }
    }
}

///Output slot of an extraction. Filled once the graph was executed.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSlot(Arc<Mutex<Option<ExtractedResource>>>);

impl ExtractionSlot {
    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }

    pub fn get(&self) -> Option<ExtractedResource> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Option<ExtractedResource> {
        self.0.lock().take()
    }

    pub(crate) fn fill(&self, resource: ExtractedResource) {
        *self.0.lock() = Some(resource);
    }
}

///Handle to a setup task. Compilation waits for every setup task of its graph.
#[derive(Clone)]
pub struct SetupTask {
    done: Receiver<()>,
    finished: Arc<AtomicBool>,
}

impl SetupTask {
    ///Blocks until the task ran. Fails if the task panicked.
    pub fn wait(&self) -> Result<(), RdgError> {
        //the sender is never used, it disconnects once the job is dropped
        while self.done.recv().is_ok() {}
        if self.finished.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RdgError::SetupTaskFailed)
        }
    }
}

pub(crate) type PostExecuteFn = Box<dyn FnOnce() + Send + 'static>;

///Declaration phase of a single-use graph.
///
/// Resources and passes are declared in order. [compile](Self::compile) consumes the graph, so nothing can be added
/// once compilation has begun, and a graph can't be executed twice.
pub struct RenderGraph<'rdg> {
    pub(crate) rdg: &'rdg mut Rdg,
    pub(crate) session: &'rdg mut GraphSession,
    pub(crate) registry: Registry,
    pub(crate) passes: Vec<PassNode>,
    pub(crate) setup_tasks: Vec<SetupTask>,
    pub(crate) commit: CommitQueue,
    pub(crate) post_execute: Vec<PostExecuteFn>,
}

impl<'rdg> RenderGraph<'rdg> {
    pub fn config(&self) -> &RdgConfig {
        &self.rdg.config
    }

    pub fn create_texture(
        &mut self,
        desc: TextureDesc,
        name: &str,
    ) -> Result<TextureHandle, RdgError> {
        self.registry.create_texture(desc, name)
    }

    pub fn create_buffer(&mut self, desc: BufferDesc, name: &str) -> Result<BufferHandle, RdgError> {
        self.registry.create_buffer(desc, name, false)
    }

    ///Creates a buffer whose element count is committed later through a [CommitSender]. `desc.element_count` is used
    /// if nothing is committed.
    pub fn create_buffer_deferred(
        &mut self,
        desc: BufferDesc,
        name: &str,
    ) -> Result<BufferHandle, RdgError> {
        self.registry.create_buffer(desc, name, true)
    }

    ///Creates a buffer whose element count is resolved by `element_count` while compiling.
    pub fn create_buffer_with_size_callback(
        &mut self,
        desc: BufferDesc,
        name: &str,
        element_count: impl FnOnce() -> u64 + Send + 'static,
    ) -> Result<BufferHandle, RdgError> {
        let handle = self.registry.create_buffer(desc, name, true)?;
        self.registry.get_mut(handle.into())?.size_callback = Some(Box::new(element_count));
        Ok(handle)
    }

    ///Sender of this graph's commit queue.
    pub fn commit_sender(&self) -> CommitSender {
        self.commit.sender()
    }

    pub fn set_resource_flags(
        &mut self,
        handle: impl Into<AnyHandle>,
        flags: ResourceFlags,
    ) -> Result<(), RdgError> {
        self.registry.get_mut(handle.into())?.flags = flags;
        Ok(())
    }

    ///Registers a texture owned by the caller. Registering the same `id` again returns the same handle.
    pub fn register_external_texture(
        &mut self,
        id: ResourceId,
        desc: TextureDesc,
        state: Option<AccessState>,
        name: &str,
    ) -> Result<TextureHandle, RdgError> {
        let states = vec![(desc.whole_range(), SubresourceState::from(state))];
        match self.registry.register_external(
            ExternalSource::Device(id),
            ResourceDesc::Texture(desc),
            states,
            name,
        )? {
            AnyHandle::Texture(t) => Ok(t),
            AnyHandle::Buffer(_) => Err(RdgError::ExternalKindMismatch(id)),
        }
    }

    ///Registers a buffer owned by the caller. Registering the same `id` again returns the same handle.
    pub fn register_external_buffer(
        &mut self,
        id: ResourceId,
        desc: BufferDesc,
        state: Option<AccessState>,
        name: &str,
    ) -> Result<BufferHandle, RdgError> {
        let states = vec![(SubresourceRange::WHOLE_BUFFER, SubresourceState::from(state))];
        match self.registry.register_external(
            ExternalSource::Device(id),
            ResourceDesc::Buffer(desc),
            states,
            name,
        )? {
            AnyHandle::Buffer(b) => Ok(b),
            AnyHandle::Texture(_) => Err(RdgError::ExternalKindMismatch(id)),
        }
    }

    ///Registers a resource extracted from an earlier graph, including its tracked access states.
    pub fn register_extracted(
        &mut self,
        resource: &ExtractedResource,
    ) -> Result<AnyHandle, RdgError> {
        self.registry.register_external(
            resource.source.clone(),
            resource.desc,
            resource.states.clone(),
            &resource.name,
        )
    }

    pub fn find_external(&self, id: ResourceId) -> Option<AnyHandle> {
        self.registry.find_external(id)
    }

    pub fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: TextureViewDesc,
    ) -> Result<ViewHandle, RdgError> {
        self.registry
            .create_view(texture.into(), desc.kind, desc.range, desc.format)
    }

    pub fn create_buffer_view(
        &mut self,
        buffer: BufferHandle,
        kind: ViewKind,
    ) -> Result<ViewHandle, RdgError> {
        self.registry
            .create_view(buffer.into(), kind, SubresourceRange::WHOLE_BUFFER, None)
    }

    pub fn create_binding_group(
        &mut self,
        name: &str,
        entries: Vec<BindingEntry>,
    ) -> Result<BindingGroupHandle, RdgError> {
        self.registry.create_binding_group(name, entries)
    }

    ///Adds a pass. `params` declares the accessed resources, `execute` records the pass body once the graph is
    /// executed. `execute` is never called if the pass is culled.
    pub fn add_pass<P, F>(
        &mut self,
        name: &str,
        params: P,
        flags: PassFlags,
        execute: F,
    ) -> Result<PassHandle, RdgError>
    where
        P: PassParameters,
        F: FnOnce(&P, &mut PassContext<'_>) + Send + 'static,
    {
        if !flags.is_valid() {
            return Err(RdgError::InvalidPassFlags {
                pass: name.to_owned(),
                flags,
            });
        }

        let mut declarations = AccessDeclarations::new();
        params.declare(&mut declarations);

        //resolve everything now, so dangling handles are reported at the declaring call
        let mut touched = Vec::new();
        for decl in &declarations.accesses {
            match decl.target {
                AccessTarget::Resource(h) => touched.push(h),
                AccessTarget::View(v) => touched.push(self.registry.view(v)?.parent),
            }
        }
        for group in &declarations.groups {
            let group = self.registry.groups.get(*group).ok_or_else(|| {
                RdgError::UnknownResource(format!("BindingGroup({:?})", group))
            })?;
            for entry in &group.entries {
                touched.push(self.registry.view(entry.view)?.parent);
            }
        }
        for handle in touched {
            self.registry.get(handle)?;
        }

        let handle = PassHandle(self.passes.len() as u32);
        #[cfg(feature = "logging")]
        log::trace!("Adding pass {} as {}", name, handle);

        self.passes.push(PassNode {
            name: name.to_owned(),
            flags,
            declarations,
            execute: Some(Box::new(move |ctx: &mut PassContext<'_>| execute(&params, ctx))),
        });
        Ok(handle)
    }

    ///Hands `handle` out of the graph once it was executed. The resource is kept alive, its producers are never
    /// culled. If `final_access` is set, the resource is transitioned into it at the end of the graph.
    pub fn queue_extraction(
        &mut self,
        handle: impl Into<AnyHandle>,
        final_access: Option<Access>,
    ) -> Result<ExtractionSlot, RdgError> {
        let res = self.registry.get_mut(handle.into())?;
        if res.extraction.is_some() {
            return Err(RdgError::DuplicateExtraction(res.name.clone()));
        }
        let slot = ExtractionSlot::default();
        res.extraction = Some(slot.clone());
        if final_access.is_some() {
            res.final_access = final_access;
        }
        Ok(slot)
    }

    ///Transitions the resource into `access` at the end of the graph.
    pub fn set_access_final(
        &mut self,
        handle: impl Into<AnyHandle>,
        access: Access,
    ) -> Result<(), RdgError> {
        self.registry.get_mut(handle.into())?.final_access = Some(access);
        Ok(())
    }

    pub fn set_texture_access_final(&mut self, texture: TextureHandle, access: Access) -> Result<(), RdgError> {
        self.set_access_final(texture, access)
    }

    pub fn set_buffer_access_final(&mut self, buffer: BufferHandle, access: Access) -> Result<(), RdgError> {
        self.set_access_final(buffer, access)
    }

    ///Runs `task` on a worker. Compilation waits for it before finalizing descriptors, so the task may commit deferred
    /// buffer sizes.
    pub fn add_setup_task(
        &mut self,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<SetupTask, RdgError> {
        let (sender, done) = crossbeam_channel::bounded::<()>(0);
        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        self.rdg.workers.spawn(Box::new(move || {
            let _sender = sender;
            task();
            finished_flag.store(true, Ordering::Release);
        }))?;

        let handle = SetupTask { done, finished };
        self.setup_tasks.push(handle.clone());
        Ok(handle)
    }

    ///Runs `callback` after every span of the graph was submitted.
    pub fn add_post_execute_callback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.post_execute.push(Box::new(callback));
    }

    ///Compiles and executes the graph in one go.
    pub fn execute(self) -> Result<ExecutionReport, RdgError> {
        self.compile()?.execute()
    }

    pub fn compile(self) -> Result<CompiledGraph<'rdg>, RdgError> {
        crate::compile::compile(self)
    }
}
