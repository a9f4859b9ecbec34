use std::{any::Any, collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    BufferDesc, CommandStream, Device, DeviceError, MemoryPlacement, Pipeline, ResourceDesc,
    ResourceId, TextureDesc,
    sync::{Fence, Transition},
};

///Single command recorded by a [HeadlessStream].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginTransitions(Vec<Transition>),
    EndTransitions(Vec<Transition>),
    Signal(Fence),
    Wait(Fence),
    BeginRenderPass(String),
    EndRenderPass,
    BeginEvent(String),
    EndEvent,
    Marker(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub pipeline: Pipeline,
    pub name: String,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Created {
        id: ResourceId,
        name: String,
        desc: ResourceDesc,
        placement: MemoryPlacement,
    },
    Destroyed(ResourceId),
    Submitted(Submission),
}

///Command stream that only records what it was asked to do.
pub struct HeadlessStream {
    pipeline: Pipeline,
    name: String,
    device_tag: usize,
    pub commands: Vec<Command>,
}

impl CommandStream for HeadlessStream {
    fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn begin_transitions(&mut self, transitions: &[Transition]) {
        if !transitions.is_empty() {
            self.commands
                .push(Command::BeginTransitions(transitions.to_vec()));
        }
    }

    fn end_transitions(&mut self, transitions: &[Transition]) {
        if !transitions.is_empty() {
            self.commands
                .push(Command::EndTransitions(transitions.to_vec()));
        }
    }

    fn signal(&mut self, fence: Fence) {
        self.commands.push(Command::Signal(fence));
    }

    fn wait(&mut self, fence: Fence) {
        self.commands.push(Command::Wait(fence));
    }

    fn begin_render_pass(&mut self, name: &str) {
        self.commands.push(Command::BeginRenderPass(name.to_owned()));
    }

    fn end_render_pass(&mut self) {
        self.commands.push(Command::EndRenderPass);
    }

    fn begin_event(&mut self, name: &str) {
        self.commands.push(Command::BeginEvent(name.to_owned()));
    }

    fn end_event(&mut self) {
        self.commands.push(Command::EndEvent);
    }

    fn marker(&mut self, label: &str) {
        self.commands.push(Command::Marker(label.to_owned()));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    live: BTreeMap<ResourceId, (String, ResourceDesc)>,
    events: Vec<DeviceEvent>,
    signaled: [u64; 2],
    allocation_budget: Option<u64>,
    submission_budget: Option<u64>,
}

///Device that executes nothing but records every call. Used for tests and dry runs of a graph.
///
/// On submission the device checks that every fence a stream waits on was signaled by an earlier submission, which makes
/// it a cheap validator for submission order.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    ///Lets the next `count` resource creations succeed, every following one fails with [DeviceError::OutOfMemory].
    pub fn set_allocation_budget(&self, count: Option<u64>) {
        self.state.lock().allocation_budget = count;
    }

    ///Lets the next `count` submissions succeed, every following one fails with [DeviceError::SubmitFailed].
    pub fn set_submission_budget(&self, count: Option<u64>) {
        self.state.lock().submission_budget = count;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Submitted(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    ///Every command of every submission in submission order.
    pub fn commands(&self) -> Vec<(Pipeline, Command)> {
        self.submissions()
            .into_iter()
            .flat_map(|s| {
                let pipeline = s.pipeline;
                s.commands.into_iter().map(move |c| (pipeline, c))
            })
            .collect()
    }

    ///All markers recorded by pass bodies, in submission order.
    pub fn markers(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|(_, c)| match c {
                Command::Marker(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    ///Returns the resources that were created and not destroyed yet.
    pub fn live_resources(&self) -> Vec<(ResourceId, String)> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(id, (name, _))| (*id, name.clone()))
            .collect()
    }

    ///Returns the name every resource was created with, including destroyed ones.
    pub fn created(&self) -> Vec<(ResourceId, String, MemoryPlacement)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Created {
                    id,
                    name,
                    placement,
                    ..
                } => Some((*id, name.clone(), *placement)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    fn tag(&self) -> usize {
        Arc::as_ptr(&self.state) as usize
    }

    fn create(
        &self,
        desc: ResourceDesc,
        placement: MemoryPlacement,
        name: &str,
    ) -> Result<ResourceId, DeviceError> {
        let mut state = self.state.lock();
        if let Some(budget) = state.allocation_budget.as_mut() {
            if *budget == 0 {
                #[cfg(feature = "logging")]
                log::error!("Headless allocation budget exhausted while creating {}", name);
                return Err(DeviceError::OutOfMemory {
                    name: name.to_owned(),
                    bytes: desc.size_in_bytes(),
                });
            }
            *budget -= 1;
        }

        let id = ResourceId(state.next_id);
        state.next_id += 1;
        state.live.insert(id, (name.to_owned(), desc));
        state.events.push(DeviceEvent::Created {
            id,
            name: name.to_owned(),
            desc,
            placement,
        });
        Ok(id)
    }
}

impl Device for HeadlessDevice {
    fn create_texture(
        &self,
        desc: &TextureDesc,
        placement: MemoryPlacement,
        name: &str,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc::Texture(*desc), placement, name)
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        placement: MemoryPlacement,
        name: &str,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc::Buffer(*desc), placement, name)
    }

    fn destroy(&self, resource: ResourceId) {
        let mut state = self.state.lock();
        if state.live.remove(&resource).is_some() {
            state.events.push(DeviceEvent::Destroyed(resource));
        } else {
            #[cfg(feature = "logging")]
            log::warn!("Tried to destroy unknown resource {}", resource);
        }
    }

    fn create_stream(
        &self,
        pipeline: Pipeline,
        name: &str,
    ) -> Result<Box<dyn CommandStream>, DeviceError> {
        Ok(Box::new(HeadlessStream {
            pipeline,
            name: name.to_owned(),
            device_tag: self.tag(),
            commands: Vec::new(),
        }))
    }

    fn submit(&self, stream: Box<dyn CommandStream>) -> Result<(), DeviceError> {
        let stream = stream
            .into_any()
            .downcast::<HeadlessStream>()
            .map_err(|_| DeviceError::ForeignStream)?;
        if stream.device_tag != self.tag() {
            return Err(DeviceError::ForeignStream);
        }

        let mut state = self.state.lock();
        if let Some(budget) = state.submission_budget.as_mut() {
            if *budget == 0 {
                return Err(DeviceError::SubmitFailed(stream.name.clone()));
            }
            *budget -= 1;
        }
        for cmd in &stream.commands {
            match cmd {
                Command::Wait(fence) => {
                    if state.signaled[fence.pipeline.index()] < fence.value {
                        return Err(DeviceError::FenceNotSignaled {
                            stream: stream.name.clone(),
                            pipeline: stream.pipeline,
                            fence: *fence,
                        });
                    }
                }
                Command::Signal(fence) => {
                    let slot = &mut state.signaled[fence.pipeline.index()];
                    *slot = (*slot).max(fence.value);
                }
                _ => {}
            }
        }

        let HeadlessStream {
            pipeline,
            name,
            commands,
            ..
        } = *stream;
        state.events.push(DeviceEvent::Submitted(Submission {
            pipeline,
            name,
            commands,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferUsage, Format, TextureUsage};

    #[test]
    fn records_and_checks_fences() {
        let device = HeadlessDevice::new();
        let mut compute = device.create_stream(Pipeline::AsyncCompute, "c").unwrap();
        compute.marker("work");
        compute.signal(Fence::new(Pipeline::AsyncCompute, 1));

        let mut gfx = device.create_stream(Pipeline::Graphics, "g").unwrap();
        gfx.wait(Fence::new(Pipeline::AsyncCompute, 1));
        gfx.marker("consume");

        device.submit(compute).unwrap();
        device.submit(gfx).unwrap();
        assert_eq!(device.markers(), vec!["work".to_owned(), "consume".to_owned()]);
    }

    #[test]
    fn wait_before_signal_fails() {
        let device = HeadlessDevice::new();
        let mut gfx = device.create_stream(Pipeline::Graphics, "g").unwrap();
        gfx.wait(Fence::new(Pipeline::AsyncCompute, 1));
        assert!(matches!(
            device.submit(gfx),
            Err(DeviceError::FenceNotSignaled { .. })
        ));
    }

    #[test]
    fn allocation_budget() {
        let device = HeadlessDevice::new();
        device.set_allocation_budget(Some(1));
        let tex = TextureDesc::texture_2d(4, 4, Format::R32Float, TextureUsage::SAMPLED);
        let id = device
            .create_texture(&tex, MemoryPlacement::Dedicated, "a")
            .unwrap();
        let buf = BufferDesc::new(4, 4, BufferUsage::STORAGE);
        assert!(
            device
                .create_buffer(&buf, MemoryPlacement::Dedicated, "b")
                .is_err()
        );
        assert_eq!(device.live_resources().len(), 1);
        device.destroy(id);
        assert!(device.live_resources().is_empty());
    }

    #[test]
    fn submission_budget() {
        let device = HeadlessDevice::new();
        device.set_submission_budget(Some(1));
        let first = device.create_stream(Pipeline::Graphics, "first").unwrap();
        let second = device.create_stream(Pipeline::Graphics, "second").unwrap();
        assert_eq!(device.submit(first), Ok(()));
        assert_eq!(
            device.submit(second),
            Err(DeviceError::SubmitFailed("second".to_owned()))
        );
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn foreign_stream_is_rejected() {
        let a = HeadlessDevice::new();
        let b = HeadlessDevice::new();
        let stream = a.create_stream(Pipeline::Graphics, "x").unwrap();
        assert_eq!(b.submit(stream), Err(DeviceError::ForeignStream));
    }
}
