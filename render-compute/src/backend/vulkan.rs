//! Vulkan implementation of [`ComputeBackend`] on `ash`.
//!
//! The backend only records; device, pipelines, pools and buffers are created
//! by the owner of the [`RenderResources`](crate::RenderResources).

use std::{ffi::c_void, ops::Range, ptr::NonNull};

use ash::vk;
use smallvec::SmallVec;

use super::{Access, ComputeBackend, DescriptorWrite, ImageBarrier, ImageLayout, PipelineStage};
use crate::{resources::MAX_IMAGES, uniform::MappedMemory};

/// Bindings written by the largest descriptor set shape.
const MAX_WRITES: usize = 4;

/// Records compute passes through an `ash` device.
#[derive(Clone)]
pub struct VulkanBackend {
    device: ash::Device,
}

impl VulkanBackend {
    /// Wraps a logical device.
    pub fn new(device: ash::Device) -> Self {
        Self { device }
    }

    /// The wrapped device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

/// A host-coherent, persistently mapped range of device memory.
pub struct VulkanMapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is only reachable through `&mut self` (behind the
// uniform buffer's mutex) and device memory is not tied to a thread.
unsafe impl Send for VulkanMapping {}

impl VulkanMapping {
    /// Wraps the pointer returned by `vkMapMemory`.
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes of host-coherent mapped memory that stay
    /// mapped, and are not accessed through another alias, for the lifetime of
    /// the returned value.
    pub unsafe fn from_raw(ptr: *mut c_void, len: usize) -> Option<Self> {
        NonNull::new(ptr.cast::<u8>()).map(|ptr| Self { ptr, len })
    }
}

impl MappedMemory for VulkanMapping {
    fn bytes(&self) -> &[u8] {
        // SAFETY: guaranteed by the `from_raw` contract.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed by the `from_raw` contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

fn vk_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn vk_access(access: Access) -> vk::AccessFlags {
    match access {
        Access::None => vk::AccessFlags::empty(),
        Access::ShaderWrite => vk::AccessFlags::SHADER_WRITE,
        Access::ShaderRead => vk::AccessFlags::SHADER_READ,
        Access::MemoryRead => vk::AccessFlags::MEMORY_READ,
    }
}

fn vk_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::ComputeShader => vk::PipelineStageFlags::COMPUTE_SHADER,
        PipelineStage::BottomOfPipe => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        PipelineStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

impl ComputeBackend for VulkanBackend {
    type Image = vk::Image;
    type ImageView = vk::ImageView;
    type Sampler = vk::Sampler;
    type Buffer = vk::Buffer;
    type Pipeline = vk::Pipeline;
    type PipelineLayout = vk::PipelineLayout;
    type DescriptorSetLayout = vk::DescriptorSetLayout;
    type DescriptorPool = vk::DescriptorPool;
    type DescriptorSet = vk::DescriptorSet;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type QueryPool = vk::QueryPool;
    type Mapping = VulkanMapping;
    type Error = vk::Result;

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), vk::Result> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite<'_, Self>]) {
        // Infos are gathered first; the write structs borrow slices of them.
        let mut image_infos: SmallVec<[vk::DescriptorImageInfo; MAX_IMAGES + 1]> = SmallVec::new();
        let mut buffer_infos: SmallVec<[vk::DescriptorBufferInfo; MAX_WRITES]> = SmallVec::new();
        let mut ranges: SmallVec<[Range<usize>; MAX_WRITES]> = SmallVec::new();

        for write in writes {
            let range = match write {
                DescriptorWrite::SampledImages { images, .. } => {
                    let first = image_infos.len();
                    image_infos.extend(images.iter().map(|image| {
                        vk::DescriptorImageInfo::default()
                            .sampler(image.sampler)
                            .image_view(image.view)
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    }));
                    first..image_infos.len()
                }
                DescriptorWrite::StorageImage { view, .. } => {
                    let first = image_infos.len();
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(*view)
                            .image_layout(vk::ImageLayout::GENERAL),
                    );
                    first..image_infos.len()
                }
                DescriptorWrite::UniformBuffer { buffer, .. } => {
                    let first = buffer_infos.len();
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(*buffer)
                            .offset(0)
                            .range(vk::WHOLE_SIZE),
                    );
                    first..buffer_infos.len()
                }
            };
            ranges.push(range);
        }

        let vk_writes: SmallVec<[vk::WriteDescriptorSet<'_>; MAX_WRITES]> = writes
            .iter()
            .zip(ranges)
            // descriptorCount must not be zero.
            .filter(|(_, range)| !range.is_empty())
            .map(|(write, range)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding())
                    .dst_array_element(0);
                match write {
                    DescriptorWrite::SampledImages { .. } => base
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&image_infos[range]),
                    DescriptorWrite::StorageImage { .. } => base
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .image_info(&image_infos[range]),
                    DescriptorWrite::UniformBuffer { .. } => base
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&buffer_infos[range]),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<(), vk::Result> {
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        unsafe { self.device.cmd_reset_query_pool(cmd, pool, first, count) };
    }

    fn cmd_write_timestamp(
        &self,
        cmd: vk::CommandBuffer,
        stage: PipelineStage,
        pool: vk::QueryPool,
        query: u32,
    ) {
        unsafe {
            self.device
                .cmd_write_timestamp(cmd, vk_stage(stage), pool, query)
        };
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier<vk::Image>) {
        let image_barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk_access(barrier.src_access))
            .dst_access_mask(vk_access(barrier.dst_access))
            .old_layout(vk_layout(barrier.old_layout))
            .new_layout(vk_layout(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk_stage(barrier.src_stage),
                vk_stage(barrier.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&image_barrier),
            );
        }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline)
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                std::slice::from_ref(&set),
                &[],
            );
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
    }
}
