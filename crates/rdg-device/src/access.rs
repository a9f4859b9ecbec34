use std::fmt::Display;

use bitflags::bitflags;

///Logical queue a piece of GPU work is executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pipeline {
    Graphics,
    AsyncCompute,
}

impl Pipeline {
    pub const ALL: [Pipeline; 2] = [Pipeline::Graphics, Pipeline::AsyncCompute];

    ///Dense index, usable to address per-pipeline arrays.
    pub fn index(&self) -> usize {
        match self {
            Pipeline::Graphics => 0,
            Pipeline::AsyncCompute => 1,
        }
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pipeline::Graphics => write!(f, "gfx"),
            Pipeline::AsyncCompute => write!(f, "acs"),
        }
    }
}

bitflags! {
    ///Access mask of a resource (range). Read and write bits are kept in the same set, so a state
    /// can be checked for being read-only via [Access::is_read_only].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const CPU_READ = 1 << 0;
        const PRESENT = 1 << 1;
        const INDIRECT_ARGS = 1 << 2;
        const VERTEX_OR_INDEX = 1 << 3;
        const SRV_COMPUTE = 1 << 4;
        const SRV_GRAPHICS = 1 << 5;
        const COPY_SRC = 1 << 6;
        const RESOLVE_SRC = 1 << 7;
        const DSV_READ = 1 << 8;

        const UAV_COMPUTE = 1 << 16;
        const UAV_GRAPHICS = 1 << 17;
        const RTV = 1 << 18;
        const COPY_DEST = 1 << 19;
        const RESOLVE_DST = 1 << 20;
        const DSV_WRITE = 1 << 21;

        const READ_ONLY_MASK = Self::CPU_READ.bits()
            | Self::PRESENT.bits()
            | Self::INDIRECT_ARGS.bits()
            | Self::VERTEX_OR_INDEX.bits()
            | Self::SRV_COMPUTE.bits()
            | Self::SRV_GRAPHICS.bits()
            | Self::COPY_SRC.bits()
            | Self::RESOLVE_SRC.bits()
            | Self::DSV_READ.bits();

        const WRITABLE_MASK = Self::UAV_COMPUTE.bits()
            | Self::UAV_GRAPHICS.bits()
            | Self::RTV.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DST.bits()
            | Self::DSV_WRITE.bits();

        const SRV_MASK = Self::SRV_COMPUTE.bits() | Self::SRV_GRAPHICS.bits();
        const UAV_MASK = Self::UAV_COMPUTE.bits() | Self::UAV_GRAPHICS.bits();

        ///Accesses that can only happen on the graphics pipeline.
        const GRAPHICS_ONLY = Self::PRESENT.bits()
            | Self::VERTEX_OR_INDEX.bits()
            | Self::SRV_GRAPHICS.bits()
            | Self::UAV_GRAPHICS.bits()
            | Self::RTV.bits()
            | Self::DSV_READ.bits()
            | Self::DSV_WRITE.bits()
            | Self::RESOLVE_SRC.bits()
            | Self::RESOLVE_DST.bits();

        ///Accesses a copy pass may declare.
        const COPY_MASK = Self::COPY_SRC.bits() | Self::COPY_DEST.bits();
    }
}

impl Access {
    ///True if no bit of this access writes.
    pub fn is_read_only(&self) -> bool {
        !self.is_empty() && !self.intersects(Access::WRITABLE_MASK)
    }

    pub fn is_writable(&self) -> bool {
        self.intersects(Access::WRITABLE_MASK)
    }

    ///Returns true if `self` and `other` can be held by a subresource at the same time.
    ///
    /// Read-only accesses always combine. A write only combines with itself.
    pub fn combines_with(&self, other: &Access) -> bool {
        if self == other {
            return true;
        }
        self.is_read_only() && other.is_read_only()
    }
}

///Known access state of a subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessState {
    pub access: Access,
    pub pipeline: Pipeline,
}

impl AccessState {
    pub fn new(access: Access, pipeline: Pipeline) -> Self {
        AccessState { access, pipeline }
    }

    pub fn graphics(access: Access) -> Self {
        AccessState::new(access, Pipeline::Graphics)
    }

    pub fn async_compute(access: Access) -> Self {
        AccessState::new(access, Pipeline::AsyncCompute)
    }
}

impl Display for AccessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.pipeline, self.access)
    }
}

///Tracked state of a single subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubresourceState {
    ///Content and layout are undefined. Used after allocation or for external resources
    /// without a known state.
    #[default]
    Unknown,
    Known(AccessState),
}

impl SubresourceState {
    pub fn pipeline(&self) -> Option<Pipeline> {
        match self {
            SubresourceState::Unknown => None,
            SubresourceState::Known(s) => Some(s.pipeline),
        }
    }

    pub fn access(&self) -> Option<Access> {
        match self {
            SubresourceState::Unknown => None,
            SubresourceState::Known(s) => Some(s.access),
        }
    }
}

impl From<AccessState> for SubresourceState {
    fn from(value: AccessState) -> Self {
        SubresourceState::Known(value)
    }
}

impl From<Option<AccessState>> for SubresourceState {
    fn from(value: Option<AccessState>) -> Self {
        match value {
            Some(s) => SubresourceState::Known(s),
            None => SubresourceState::Unknown,
        }
    }
}

impl Display for SubresourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubresourceState::Unknown => write!(f, "Unknown"),
            SubresourceState::Known(s) => write!(f, "{}", s),
        }
    }
}
