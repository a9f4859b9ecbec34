//! # RDG device interface
//!
//! Everything the render dependency graph needs from the outside world: resource descriptors, access states, a way to
//! create and destroy physical resources, command streams that record transitions and pass bodies, and workers that run
//! jobs asynchronously.
//!
//! [HeadlessDevice] implements the interface without a GPU. It records every call, which makes it useful for tests and
//! for dry runs of a frame graph.

mod access;
pub use access::{Access, AccessState, Pipeline, SubresourceState};

mod device;
pub use device::{CommandStream, Device};

mod error;
pub use error::DeviceError;

mod headless;
pub use headless::{Command, DeviceEvent, HeadlessDevice, HeadlessStream, Submission};

mod resources;
pub use resources::{
    BufferDesc, BufferUsage, DescriptorError, Extent3d, Format, MemoryPlacement, ResourceDesc,
    ResourceId, SubresourceRange, TextureDesc, TextureDimension, TextureUsage,
};

pub mod sync;
pub use sync::{Fence, ResourceKind, Transition};

pub mod worker;
pub use worker::{InlineWorkers, ThreadPool, Workers};

#[cfg(feature = "vulkan")]
pub mod vk;

#[cfg(feature = "vulkan")]
pub use ash;
