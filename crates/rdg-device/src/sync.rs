use std::fmt::Display;

use crate::{AccessState, Format, Pipeline, ResourceId, SubresourceRange, SubresourceState};

///Timeline point on a pipeline. Signaling a fence marks all work submitted to that pipeline before the
/// signal as finished for every later wait on a value smaller or equal to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fence {
    pub pipeline: Pipeline,
    pub value: u64,
}

impl Fence {
    pub fn new(pipeline: Pipeline, value: u64) -> Self {
        Fence { pipeline, value }
    }
}

impl Display for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pipeline, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture(Format),
    Buffer,
}

///Single state change of a subresource range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    pub resource: ResourceId,
    pub kind: ResourceKind,
    pub range: SubresourceRange,
    pub before: SubresourceState,
    pub after: AccessState,
}

impl Transition {
    ///True if the transition moves the range between pipelines.
    pub fn is_cross_pipeline(&self) -> bool {
        match self.before.pipeline() {
            Some(p) => p != self.after.pipeline,
            None => false,
        }
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} {} -> {}",
            self.resource, self.range, self.before, self.after
        )
    }
}
