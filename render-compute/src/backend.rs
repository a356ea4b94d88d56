//! The GPU-API surface used by the compute passes.
//!
//! [`ComputeBackend`] lists every call the pass sequencer makes, in the
//! vocabulary of explicit APIs: descriptor pools and sets, command pools and
//! buffers, image barriers and timestamp queries. Handle types are plain
//! `Copy` values owned elsewhere; the backend never takes ownership of them.
//!
//! Two implementations ship with the crate: [`vulkan::VulkanBackend`] on top of
//! `ash`, and `testing::RecordingBackend` (feature `testing`) which records the
//! command stream in memory.

#[cfg(feature = "vulkan")]
pub mod vulkan;

use std::fmt::Debug;

use crate::uniform::MappedMemory;

/// Image layouts the compute passes transition between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents may be discarded.
    Undefined,
    /// Storage image access from shaders.
    General,
    /// Sampled access from shaders.
    ShaderReadOnly,
    /// Ready for the presentation engine.
    PresentSrc,
}

/// Memory access kinds named in barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// No access.
    None,
    /// Shader storage writes.
    ShaderWrite,
    /// Shader sampled or storage reads.
    ShaderRead,
    /// Any read by any consumer.
    MemoryRead,
}

/// Pipeline stages named in barriers and timestamp writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Before any work.
    TopOfPipe,
    /// The compute shader stage.
    ComputeShader,
    /// After all work.
    BottomOfPipe,
    /// Every stage.
    AllCommands,
}

/// A layout transition with its execution and memory dependency.
///
/// Always covers every mip level and array layer of the colour aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier<I> {
    /// Image being transitioned.
    pub image: I,
    /// Accesses that must complete before the transition.
    pub src_access: Access,
    /// Accesses that wait for the transition.
    pub dst_access: Access,
    /// Layout the image is in.
    pub old_layout: ImageLayout,
    /// Layout the image ends up in.
    pub new_layout: ImageLayout,
    /// Stages that must complete first.
    pub src_stage: PipelineStage,
    /// Stages that wait.
    pub dst_stage: PipelineStage,
}

/// A sampler paired with the image view it samples.
pub struct SampledImage<B: ComputeBackend + ?Sized> {
    /// Sampler state.
    pub sampler: B::Sampler,
    /// Image view, bound in [`ImageLayout::ShaderReadOnly`].
    pub view: B::ImageView,
}

impl<B: ComputeBackend + ?Sized> SampledImage<B> {
    /// Pairs `sampler` with `view`.
    pub fn new(sampler: B::Sampler, view: B::ImageView) -> Self {
        Self { sampler, view }
    }
}

impl<B: ComputeBackend + ?Sized> Clone for SampledImage<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ComputeBackend + ?Sized> Copy for SampledImage<B> {}

impl<B: ComputeBackend + ?Sized> PartialEq for SampledImage<B> {
    fn eq(&self, other: &Self) -> bool {
        self.sampler == other.sampler && self.view == other.view
    }
}

impl<B: ComputeBackend + ?Sized> Debug for SampledImage<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampledImage")
            .field("sampler", &self.sampler)
            .field("view", &self.view)
            .finish()
    }
}

/// One binding's worth of a batched descriptor update.
///
/// Each write starts at array element zero and covers as many elements as it
/// carries.
pub enum DescriptorWrite<'a, B: ComputeBackend + ?Sized> {
    /// Combined image samplers.
    SampledImages {
        /// Binding slot.
        binding: u32,
        /// Images for elements `0..images.len()`.
        images: &'a [SampledImage<B>],
    },
    /// A storage image in [`ImageLayout::General`].
    StorageImage {
        /// Binding slot.
        binding: u32,
        /// View written by the shader.
        view: B::ImageView,
    },
    /// A uniform buffer bound over its whole range.
    UniformBuffer {
        /// Binding slot.
        binding: u32,
        /// Buffer handle.
        buffer: B::Buffer,
    },
}

impl<B: ComputeBackend + ?Sized> DescriptorWrite<'_, B> {
    /// Binding slot this write targets.
    pub fn binding(&self) -> u32 {
        match self {
            Self::SampledImages { binding, .. }
            | Self::StorageImage { binding, .. }
            | Self::UniformBuffer { binding, .. } => *binding,
        }
    }

    /// Number of array elements written.
    pub fn descriptor_count(&self) -> usize {
        match self {
            Self::SampledImages { images, .. } => images.len(),
            Self::StorageImage { .. } | Self::UniformBuffer { .. } => 1,
        }
    }
}

/// Bounds shared by every handle type.
pub trait Handle: Copy + Debug + PartialEq + Send + Sync + 'static {}

impl<T: Copy + Debug + PartialEq + Send + Sync + 'static> Handle for T {}

/// A GPU API able to record the compositor's compute passes.
///
/// Command-recording methods (`cmd_*`) cannot fail; host-side operations that
/// the underlying API reports errors for return [`ComputeBackend::Error`].
pub trait ComputeBackend: Send + Sync {
    /// Image handle, used in barriers.
    type Image: Handle;
    /// Image view handle, used in descriptors.
    type ImageView: Handle;
    /// Sampler handle.
    type Sampler: Handle;
    /// Buffer handle.
    type Buffer: Handle;
    /// Compute pipeline handle.
    type Pipeline: Handle;
    /// Pipeline layout handle.
    type PipelineLayout: Handle;
    /// Descriptor set layout handle.
    type DescriptorSetLayout: Handle;
    /// Descriptor pool handle.
    type DescriptorPool: Handle;
    /// Descriptor set handle.
    type DescriptorSet: Handle;
    /// Command pool handle.
    type CommandPool: Handle;
    /// Command buffer handle.
    type CommandBuffer: Handle;
    /// Timestamp query pool handle.
    type QueryPool: Handle;
    /// Persistent host mapping of a uniform buffer.
    type Mapping: MappedMemory;
    /// Error reported by fallible host operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Allocates one descriptor set of `layout` from `pool`.
    fn allocate_descriptor_set(
        &self,
        pool: Self::DescriptorPool,
        layout: Self::DescriptorSetLayout,
    ) -> Result<Self::DescriptorSet, Self::Error>;

    /// Returns every set allocated from `pool` back to it.
    fn reset_descriptor_pool(&self, pool: Self::DescriptorPool) -> Result<(), Self::Error>;

    /// Applies `writes` to `set` in a single batched update.
    fn update_descriptor_set(&self, set: Self::DescriptorSet, writes: &[DescriptorWrite<'_, Self>]);

    /// Resets `pool` and every command buffer allocated from it.
    fn reset_command_pool(&self, pool: Self::CommandPool) -> Result<(), Self::Error>;

    /// Opens `cmd` for one-time-submit recording.
    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> Result<(), Self::Error>;

    /// Closes recording of `cmd`.
    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> Result<(), Self::Error>;

    /// Resets `count` queries starting at `first`.
    fn cmd_reset_query_pool(
        &self,
        cmd: Self::CommandBuffer,
        pool: Self::QueryPool,
        first: u32,
        count: u32,
    );

    /// Writes a timestamp into `query` once `stage` is reached.
    fn cmd_write_timestamp(
        &self,
        cmd: Self::CommandBuffer,
        stage: PipelineStage,
        pool: Self::QueryPool,
        query: u32,
    );

    /// Records an image memory barrier.
    fn cmd_image_barrier(&self, cmd: Self::CommandBuffer, barrier: &ImageBarrier<Self::Image>);

    /// Binds a compute pipeline.
    fn cmd_bind_pipeline(&self, cmd: Self::CommandBuffer, pipeline: Self::Pipeline);

    /// Binds `set` at set index zero of `layout` for compute.
    fn cmd_bind_descriptor_set(
        &self,
        cmd: Self::CommandBuffer,
        layout: Self::PipelineLayout,
        set: Self::DescriptorSet,
    );

    /// Dispatches `x * y * z` work groups.
    fn cmd_dispatch(&self, cmd: Self::CommandBuffer, x: u32, y: u32, z: u32);
}
