//! Mapping of graph states onto Vulkan synchronization2 barriers.
//!
//! Meant for backends that implement [Device](crate::Device) on top of ash. The graph itself never calls into Vulkan.

use ash::vk;

use crate::{
    Access, AccessState, Format, Pipeline, SubresourceRange, SubresourceState,
    sync::{ResourceKind, Transition},
};

///Maps a [Format] to the matching [ash format](vk::Format).
pub fn map_format(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32Float => vk::ImageAspectFlags::DEPTH,
        Format::D24UnormS8Uint => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

///Stage, access mask and layout of a single access bit.
fn map_access_bit(bit: Access) -> (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout) {
    type S = vk::PipelineStageFlags2;
    type A = vk::AccessFlags2;
    type L = vk::ImageLayout;

    let shader_read = A::SHADER_SAMPLED_READ | A::SHADER_STORAGE_READ | A::UNIFORM_READ;
    let graphics_shaders = S::VERTEX_SHADER | S::FRAGMENT_SHADER;

    let table = [
        (Access::CPU_READ, (S::HOST, A::HOST_READ, L::GENERAL)),
        (Access::PRESENT, (S::NONE, A::NONE, L::PRESENT_SRC_KHR)),
        (Access::INDIRECT_ARGS, (S::DRAW_INDIRECT, A::INDIRECT_COMMAND_READ, L::GENERAL)),
        (Access::VERTEX_OR_INDEX, (
            S::VERTEX_INPUT,
            A::VERTEX_ATTRIBUTE_READ | A::INDEX_READ,
            L::GENERAL,
        )),
        (Access::SRV_COMPUTE, (S::COMPUTE_SHADER, shader_read, L::SHADER_READ_ONLY_OPTIMAL)),
        (Access::SRV_GRAPHICS, (graphics_shaders, shader_read, L::SHADER_READ_ONLY_OPTIMAL)),
        (Access::COPY_SRC, (S::COPY, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL)),
        (Access::RESOLVE_SRC, (S::RESOLVE, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL)),
        (Access::DSV_READ, (
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ,
            L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        )),
        (Access::UAV_COMPUTE, (
            S::COMPUTE_SHADER,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
            L::GENERAL,
        )),
        (Access::UAV_GRAPHICS, (
            graphics_shaders,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
            L::GENERAL,
        )),
        (Access::RTV, (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            L::COLOR_ATTACHMENT_OPTIMAL,
        )),
        (Access::COPY_DEST, (S::COPY, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL)),
        (Access::RESOLVE_DST, (S::RESOLVE, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL)),
        (Access::DSV_WRITE, (
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )),
    ];

    table
        .into_iter()
        .find(|(a, _)| *a == bit)
        .map(|(_, mapping)| mapping)
        .unwrap_or((S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE, L::GENERAL))
}

///Returns the stage mask, access mask and image layout of `access`. Combined read states that disagree on the layout
/// fall back to [vk::ImageLayout::GENERAL].
pub fn map_access(access: Access) -> (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout) {
    let mut stages = vk::PipelineStageFlags2::NONE;
    let mut mask = vk::AccessFlags2::NONE;
    let mut layout = None;
    for bit in access.iter() {
        let (s, a, l) = map_access_bit(bit);
        stages |= s;
        mask |= a;
        layout = match layout {
            None => Some(l),
            Some(prev) if prev == l => Some(prev),
            Some(_) => Some(vk::ImageLayout::GENERAL),
        };
    }
    (stages, mask, layout.unwrap_or(vk::ImageLayout::UNDEFINED))
}

fn map_state(
    state: &SubresourceState,
) -> (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout) {
    match state {
        SubresourceState::Unknown => (
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::UNDEFINED,
        ),
        SubresourceState::Known(AccessState { access, .. }) => map_access(*access),
    }
}

pub fn map_range(format: Format, range: &SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask(format))
        .base_mip_level(range.mip_base)
        .level_count(range.mip_count)
        .base_array_layer(range.layer_base)
        .layer_count(range.layer_count)
}

///Queue family of each pipeline on the backing device.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub async_compute: u32,
}

impl QueueFamilies {
    pub fn family(&self, pipeline: Pipeline) -> u32 {
        match pipeline {
            Pipeline::Graphics => self.graphics,
            Pipeline::AsyncCompute => self.async_compute,
        }
    }

    ///Source and destination family of `transition`. Ignored unless the transition crosses families.
    fn ownership(&self, transition: &Transition) -> (u32, u32) {
        match transition.before.pipeline() {
            Some(src) if self.family(src) != self.family(transition.after.pipeline) => {
                (self.family(src), self.family(transition.after.pipeline))
            }
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        }
    }
}

///Physical object a transition refers to.
#[derive(Debug, Clone, Copy)]
pub enum VkHandle {
    Image(vk::Image),
    Buffer(vk::Buffer),
}

///Collects synchronization2 barriers for a batch of [Transition]s.
#[derive(Debug, Default)]
pub struct BarrierBuilder {
    pub images: Vec<vk::ImageMemoryBarrier2<'static>>,
    pub buffers: Vec<vk::BufferMemoryBarrier2<'static>>,
}

impl BarrierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    ///Pushes the barrier for `transition`. `handle` must be the physical object of `transition.resource`.
    pub fn push(
        &mut self,
        transition: &Transition,
        handle: VkHandle,
        families: &QueueFamilies,
    ) -> &mut Self {
        let (src_stage, src_access, src_layout) = map_state(&transition.before);
        let (dst_stage, dst_access, dst_layout) = map_access(transition.after.access);
        let (src_family, dst_family) = families.ownership(transition);

        match (handle, transition.kind) {
            (VkHandle::Image(image), ResourceKind::Texture(format)) => {
                self.images.push(
                    vk::ImageMemoryBarrier2::default()
                        .image(image)
                        .subresource_range(map_range(format, &transition.range))
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .old_layout(src_layout)
                        .src_queue_family_index(src_family)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .new_layout(dst_layout)
                        .dst_queue_family_index(dst_family),
                );
            }
            (VkHandle::Buffer(buffer), ResourceKind::Buffer) => {
                self.buffers.push(
                    vk::BufferMemoryBarrier2::default()
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .src_queue_family_index(src_family)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .dst_queue_family_index(dst_family),
                );
            }
            _ => {
                #[cfg(feature = "logging")]
                log::error!("Handle kind does not match transition {}", transition);
            }
        }
        self
    }

    pub fn has_barrier(&self) -> bool {
        !self.images.is_empty() || !self.buffers.is_empty()
    }

    pub fn dependency_info(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default()
            .image_memory_barriers(&self.images)
            .buffer_memory_barriers(&self.buffers)
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceId;

    #[test]
    fn layouts() {
        assert_eq!(
            map_access(Access::RTV).2,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            map_access(Access::SRV_COMPUTE | Access::SRV_GRAPHICS).2,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            map_access(Access::SRV_COMPUTE | Access::COPY_SRC).2,
            vk::ImageLayout::GENERAL
        );
    }

    #[test]
    fn cross_family_barrier() {
        let families = QueueFamilies {
            graphics: 0,
            async_compute: 1,
        };
        let t = Transition {
            resource: ResourceId(3),
            kind: ResourceKind::Buffer,
            range: SubresourceRange::WHOLE_BUFFER,
            before: AccessState::async_compute(Access::UAV_COMPUTE).into(),
            after: AccessState::graphics(Access::SRV_GRAPHICS),
        };
        let mut builder = BarrierBuilder::new();
        builder.push(&t, VkHandle::Buffer(vk::Buffer::null()), &families);
        assert!(builder.has_barrier());
        assert_eq!(builder.buffers[0].src_queue_family_index, 1);
        assert_eq!(builder.buffers[0].dst_queue_family_index, 0);
    }
}
