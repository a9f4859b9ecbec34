//! # Render dependency graph (RDG)
//!
//! A frame is described as a list of passes. Each pass declares which textures and buffers it reads and writes,
//! and brings a callback that records the actual GPU work once the graph runs. Nothing is recorded while declaring.
//!
//! Compiling a [RenderGraph] then
//!
//! - culls every pass whose output never reaches an extracted resource or a `NEVER_CULL` pass,
//! - decides for every graph owned resource whether it can alias memory with others (transient) or must be durable (pooled),
//! - plans the minimal set of state transitions, including fences between the graphics and async compute pipeline,
//! - partitions the kept passes into spans that are recorded on worker threads and submitted in declaration order.
//!
//! The device side lives in the `rdg-device` crate. Use its [HeadlessDevice](rdg_device::HeadlessDevice) to dry-run graphs.
//!
//! ```ignore
//! let mut rdg = Rdg::new(device, workers, RdgConfig::default());
//! let mut session = GraphSession::new();
//! let mut graph = rdg.record(&mut session);
//! let color = graph.create_texture(desc, "color")?;
//! graph.add_pass("clear", AccessDeclarations::build(|d| { d.render_target(color, 0); }), PassFlags::RASTER, |_, ctx| {
//!     ctx.stream().marker("clear");
//! })?;
//! let out = graph.queue_extraction(color, Some(Access::SRV_GRAPHICS))?;
//! graph.execute()?;
//! ```

use rdg_device::{Access, DescriptorError, DeviceError, ResourceId, SubresourceRange};
use thiserror::Error;

mod config;
pub use config::{ParallelConfig, RdgConfig, TransientConfig};

mod session;
pub use session::GraphSession;

mod resources;
pub use resources::{
    AnyHandle, BindingEntry, BindingGroupHandle, BufferHandle, ExternalSource, PooledResource, ResourceFlags,
    ResourcePool, TextureHandle, TextureViewDesc, ViewHandle, ViewKind,
};

mod pass;
pub use pass::{
    AccessDeclarations, AccessKind, AccessTarget, DeclaredAccess, PassContext, PassFlags,
    PassHandle, PassParameters,
};

mod commit;
pub use commit::CommitSender;

mod graph;
pub use graph::{ExtractedResource, ExtractionSlot, Rdg, RenderGraph, SetupTask};

///Compilation stages. Turns a declared graph into an executable plan.
pub mod compile;
pub use compile::{
    Backing, BarrierBatch, CompiledGraph, CompiledPass, PassIndex, PlannedTransition,
    ResolvedAccess, ResourcePlan, SpanMode, SpanPlan, TransientSlot,
};

mod execute;
pub use execute::ExecutionReport;

pub use rdg_device;

#[derive(Debug, Error)]
pub enum RdgError {
    #[error("Invalid descriptor for {name}")]
    InvalidDescriptor {
        name: String,
        #[source]
        reason: DescriptorError,
    },
    #[error("Invalid view on {resource}: {reason}")]
    InvalidView { resource: String, reason: String },
    #[error("Pass {pass} declares an invalid access {access:?} on {resource}: {reason}")]
    InvalidAccess {
        pass: String,
        resource: String,
        access: Access,
        reason: String,
    },
    #[error("Pass {pass} accesses {range} of {resource} as {first:?} and {second:?}")]
    ConflictingAccess {
        pass: String,
        resource: String,
        range: SubresourceRange,
        first: Access,
        second: Access,
    },
    #[error("Pass {pass} has an invalid flag combination {flags:?}")]
    InvalidPassFlags { pass: String, flags: PassFlags },
    #[error("Handle {0} does not belong to this graph")]
    UnknownResource(String),
    #[error("External resource {0} was registered before with a different kind")]
    ExternalKindMismatch(ResourceId),
    #[error("Resource {0} is already queued for extraction")]
    DuplicateExtraction(String),
    #[error("Setup task panicked")]
    SetupTaskFailed,
    #[error("Worker recording span {0} was lost")]
    WorkerLost(usize),
    #[error("Device error")]
    Device(#[from] DeviceError),
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RdgError: Send, Sync);
    assert_impl_all!(CommitSender: Send, Sync, Clone);
    assert_impl_all!(ExtractionSlot: Send, Sync);
    assert_impl_all!(ExtractedResource: Send, Sync);
    assert_impl_all!(SetupTask: Send, Sync);
    assert_impl_all!(Rdg: Send);
}
