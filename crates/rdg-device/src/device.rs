use std::any::Any;

use crate::{
    BufferDesc, DeviceError, MemoryPlacement, Pipeline, ResourceId, TextureDesc,
    sync::{Fence, Transition},
};

///Command recording interface handed to pass bodies and to the graph's barrier emission.
///
/// A stream is created for exactly one pipeline and submitted as a whole. Streams are recorded on worker threads,
/// therefore they must be `Send`.
pub trait CommandStream: Send {
    fn pipeline(&self) -> Pipeline;
    fn name(&self) -> &str;

    ///Starts the given transitions. The matching [end_transitions](Self::end_transitions) may happen later on the same
    /// or (after a fence) on another stream.
    fn begin_transitions(&mut self, transitions: &[Transition]);
    fn end_transitions(&mut self, transitions: &[Transition]);

    ///Signals `fence` once all prior work of this stream has finished.
    fn signal(&mut self, fence: Fence);
    ///Blocks all following work of this stream until `fence` was signaled.
    fn wait(&mut self, fence: Fence);

    fn begin_render_pass(&mut self, name: &str);
    fn end_render_pass(&mut self);

    ///Debug region markers.
    fn begin_event(&mut self, name: &str);
    fn end_event(&mut self);
    fn marker(&mut self, label: &str);

    ///Allows pass bodies to reach backend specific recording functions.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

///Narrow device interface the graph is executed on.
pub trait Device: Send + Sync {
    fn create_texture(
        &self,
        desc: &TextureDesc,
        placement: MemoryPlacement,
        name: &str,
    ) -> Result<ResourceId, DeviceError>;

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        placement: MemoryPlacement,
        name: &str,
    ) -> Result<ResourceId, DeviceError>;

    ///Schedules destruction of `resource` once all submitted work using it has finished.
    fn destroy(&self, resource: ResourceId);

    fn create_stream(
        &self,
        pipeline: Pipeline,
        name: &str,
    ) -> Result<Box<dyn CommandStream>, DeviceError>;

    fn submit(&self, stream: Box<dyn CommandStream>) -> Result<(), DeviceError>;
}
