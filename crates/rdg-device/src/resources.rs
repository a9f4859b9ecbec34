use std::{fmt::Display, ops::Range};

use bitflags::bitflags;
use smallvec::SmallVec;
use thiserror::Error;

///Opaque handle of a physical resource living on a [Device](crate::Device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("Extent {0:?} has a zero sized axis")]
    ZeroExtent(Extent3d),
    #[error("Texture needs at least one mip level and one array layer")]
    ZeroSubresources,
    #[error("Requested {requested} mip levels, but extent only allows {max}")]
    TooManyMips { requested: u32, max: u32 },
    #[error("{0:?} does not support {1} array layers")]
    UnsupportedLayers(TextureDimension, u32),
    #[error("Cube textures must be square, got {0}x{1}")]
    NonSquareCube(u32, u32),
    #[error("Multisampled textures can't have mips")]
    MultisampledMips,
    #[error("Sample count {0} is not supported")]
    UnsupportedSampleCount(u32),
    #[error("Buffer element size can't be zero")]
    ZeroStride,
    #[error("Buffer element count can't be zero")]
    ZeroElements,
    #[error("Resource has no usage flags")]
    NoUsage,
    #[error("Format {0:?} can't be used with {1:?}")]
    UnsupportedUsage(Format, TextureUsage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    R16G16B16A16Float,
    R32Float,
    R32Uint,
    R32G32B32A32Float,
    D32Float,
    D24UnormS8Uint,
}

impl Format {
    pub fn bytes_per_texel(&self) -> u64 {
        match self {
            Format::R8Unorm => 1,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::B8G8R8A8Unorm
            | Format::R32Float
            | Format::R32Uint
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Float => 8,
            Format::R32G32B32A32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const PRESENT = 1 << 6;
        const CPU_READBACK = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const SHADER_READ = 1 << 3;
        const STORAGE = 1 << 4;
        const INDIRECT = 1 << 5;
        const COPY_SRC = 1 << 6;
        const COPY_DST = 1 << 7;
        const CPU_READBACK = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    D2Array,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Extent3d {
            width,
            height,
            depth,
        }
    }

    fn at_mip(&self, mip: u32) -> Extent3d {
        Extent3d {
            width: (self.width >> mip).max(1),
            height: (self.height >> mip).max(1),
            depth: (self.depth >> mip).max(1),
        }
    }

    ///Number of mips until every axis reaches 1.
    pub fn max_mips(&self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub extent: Extent3d,
    pub format: Format,
    pub usage: TextureUsage,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
}

impl TextureDesc {
    ///Single mip, single layer 2d texture.
    pub fn texture_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        TextureDesc {
            dimension: TextureDimension::D2,
            extent: Extent3d::new(width, height, 1),
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        if layers > 1 && self.dimension == TextureDimension::D2 {
            self.dimension = TextureDimension::D2Array;
        }
        self
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        let e = self.extent;
        if e.width == 0 || e.height == 0 || e.depth == 0 {
            return Err(DescriptorError::ZeroExtent(e));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(DescriptorError::ZeroSubresources);
        }
        if self.usage.is_empty() {
            return Err(DescriptorError::NoUsage);
        }
        if self.mip_levels > e.max_mips() {
            return Err(DescriptorError::TooManyMips {
                requested: self.mip_levels,
                max: e.max_mips(),
            });
        }
        if !matches!(self.samples, 1 | 2 | 4 | 8 | 16) {
            return Err(DescriptorError::UnsupportedSampleCount(self.samples));
        }
        if self.samples > 1 && self.mip_levels > 1 {
            return Err(DescriptorError::MultisampledMips);
        }
        match self.dimension {
            TextureDimension::D2 if self.array_layers != 1 || e.depth != 1 => {
                return Err(DescriptorError::UnsupportedLayers(
                    self.dimension,
                    self.array_layers,
                ));
            }
            TextureDimension::D2Array if e.depth != 1 => {
                return Err(DescriptorError::UnsupportedLayers(
                    self.dimension,
                    self.array_layers,
                ));
            }
            TextureDimension::D3 if self.array_layers != 1 => {
                return Err(DescriptorError::UnsupportedLayers(
                    self.dimension,
                    self.array_layers,
                ));
            }
            TextureDimension::Cube => {
                if e.width != e.height {
                    return Err(DescriptorError::NonSquareCube(e.width, e.height));
                }
                if self.array_layers % 6 != 0 || e.depth != 1 {
                    return Err(DescriptorError::UnsupportedLayers(
                        self.dimension,
                        self.array_layers,
                    ));
                }
            }
            _ => {}
        }

        let depth_usage = self.usage.contains(TextureUsage::DEPTH_STENCIL);
        if depth_usage != self.format.is_depth()
            && (depth_usage || self.usage.contains(TextureUsage::RENDER_TARGET))
        {
            return Err(DescriptorError::UnsupportedUsage(self.format, self.usage));
        }
        if self.format.is_depth() && self.usage.contains(TextureUsage::STORAGE) {
            return Err(DescriptorError::UnsupportedUsage(self.format, self.usage));
        }

        Ok(())
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels.saturating_mul(self.array_layers)
    }

    ///Range covering every mip and layer.
    pub fn whole_range(&self) -> SubresourceRange {
        SubresourceRange {
            mip_base: 0,
            mip_count: self.mip_levels,
            layer_base: 0,
            layer_count: self.array_layers,
        }
    }

    ///Bytes needed to back the texture, including all mips, layers and samples. Saturates at `u64::MAX`.
    pub fn size_in_bytes(&self) -> u64 {
        let texel_bytes = self.format.bytes_per_texel().saturating_mul(self.samples as u64);
        (0..self.mip_levels)
            .map(|mip| {
                let e = self.extent.at_mip(mip);
                (e.width as u64)
                    .saturating_mul(e.height as u64)
                    .saturating_mul(e.depth as u64)
            })
            .fold(0u64, u64::saturating_add)
            .saturating_mul(self.array_layers as u64)
            .saturating_mul(texel_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub element_size: u32,
    pub element_count: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(element_size: u32, element_count: u64, usage: BufferUsage) -> Self {
        BufferDesc {
            element_size,
            element_count,
            usage,
        }
    }

    ///Validates everything except the element count. Used for buffers whose size is committed later.
    pub fn validate_layout(&self) -> Result<(), DescriptorError> {
        if self.element_size == 0 {
            return Err(DescriptorError::ZeroStride);
        }
        if self.usage.is_empty() {
            return Err(DescriptorError::NoUsage);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.validate_layout()?;
        if self.element_count == 0 {
            return Err(DescriptorError::ZeroElements);
        }
        Ok(())
    }

    ///Saturates at `u64::MAX`.
    pub fn size_in_bytes(&self) -> u64 {
        (self.element_size as u64).saturating_mul(self.element_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn size_in_bytes(&self) -> u64 {
        match self {
            ResourceDesc::Texture(t) => t.size_in_bytes(),
            ResourceDesc::Buffer(b) => b.size_in_bytes(),
        }
    }

    pub fn whole_range(&self) -> SubresourceRange {
        match self {
            ResourceDesc::Texture(t) => t.whole_range(),
            ResourceDesc::Buffer(_) => SubresourceRange::WHOLE_BUFFER,
        }
    }
}

///Where the device places a new resource in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryPlacement {
    ///Own allocation, never shared.
    Dedicated,
    ///Placed into transient slot `slot` of `size` bytes. Several resources may be placed in the same
    /// slot, but never at the same time.
    Aliased { slot: u32, size: u64 },
}

///Rectangle of mip levels and array layers. Buffers consist of a single subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub mip_base: u32,
    pub mip_count: u32,
    pub layer_base: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    pub const WHOLE_BUFFER: SubresourceRange = SubresourceRange {
        mip_base: 0,
        mip_count: 1,
        layer_base: 0,
        layer_count: 1,
    };

    pub fn new(mips: Range<u32>, layers: Range<u32>) -> Self {
        SubresourceRange {
            mip_base: mips.start,
            mip_count: mips.end.saturating_sub(mips.start),
            layer_base: layers.start,
            layer_count: layers.end.saturating_sub(layers.start),
        }
    }

    pub fn mip(level: u32) -> Self {
        SubresourceRange::new(level..level.saturating_add(1), 0..1)
    }

    pub fn mips(&self) -> Range<u32> {
        self.mip_base..self.mip_base.saturating_add(self.mip_count)
    }

    pub fn layers(&self) -> Range<u32> {
        self.layer_base..self.layer_base.saturating_add(self.layer_count)
    }

    pub fn is_empty(&self) -> bool {
        self.mip_count == 0 || self.layer_count == 0
    }

    pub fn count(&self) -> u32 {
        self.mip_count.saturating_mul(self.layer_count)
    }

    ///True if `other` lies completely within `self`.
    pub fn contains(&self, other: &SubresourceRange) -> bool {
        other.is_empty()
            || (self.mip_base <= other.mip_base
                && self.mips().end >= other.mips().end
                && self.layer_base <= other.layer_base
                && self.layers().end >= other.layers().end)
    }

    pub fn intersection(&self, other: &SubresourceRange) -> Option<SubresourceRange> {
        let mips = self.mip_base.max(other.mip_base)..self.mips().end.min(other.mips().end);
        let layers =
            self.layer_base.max(other.layer_base)..self.layers().end.min(other.layers().end);
        let isec = SubresourceRange::new(mips, layers);
        if isec.is_empty() { None } else { Some(isec) }
    }

    pub fn overlaps(&self, other: &SubresourceRange) -> bool {
        self.intersection(other).is_some()
    }

    ///Returns the parts of `self` that are not covered by `other`. The result is disjoint and
    /// consists of at most four rectangles.
    pub fn subtract(&self, other: &SubresourceRange) -> SmallVec<[SubresourceRange; 4]> {
        let mut rest = SmallVec::new();
        let Some(isec) = self.intersection(other) else {
            rest.push(*self);
            return rest;
        };

        //Full-width bands below and above the intersection's layers.
        if isec.layer_base > self.layer_base {
            rest.push(SubresourceRange::new(
                self.mips(),
                self.layer_base..isec.layer_base,
            ));
        }
        if isec.layers().end < self.layers().end {
            rest.push(SubresourceRange::new(
                self.mips(),
                isec.layers().end..self.layers().end,
            ));
        }
        //Left and right of the intersection within its layers.
        if isec.mip_base > self.mip_base {
            rest.push(SubresourceRange::new(
                self.mip_base..isec.mip_base,
                isec.layers(),
            ));
        }
        if isec.mips().end < self.mips().end {
            rest.push(SubresourceRange::new(
                isec.mips().end..self.mips().end,
                isec.layers(),
            ));
        }

        rest
    }
}

impl Display for SubresourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[mip {}..{}, layer {}..{}]",
            self.mip_base,
            self.mips().end,
            self.layer_base,
            self.layers().end
        )
    }
}
