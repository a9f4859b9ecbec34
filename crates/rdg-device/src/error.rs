use thiserror::Error;

use crate::{Pipeline, ResourceId, sync::Fence};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Failed to allocate {bytes} bytes for resource {name}")]
    OutOfMemory { name: String, bytes: u64 },
    #[error("Resource {0:?} is unknown to the device")]
    UnknownResource(ResourceId),
    #[error("Stream {stream} on {pipeline:?} waits for {fence}, which was never signaled before")]
    FenceNotSignaled {
        stream: String,
        pipeline: Pipeline,
        fence: Fence,
    },
    #[error("Submitting stream {0} failed")]
    SubmitFailed(String),
    #[error("Command stream was created by a different device")]
    ForeignStream,
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
    #[error("Worker pool was shut down")]
    WorkerDisconnected,
}
