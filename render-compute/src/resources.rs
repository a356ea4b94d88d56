//! Shared GPU objects the compute passes record against.
//!
//! Everything here is created and destroyed by the owner of the renderer; the
//! compute context only borrows it between `init` and `fini`.

use crate::{
    backend::ComputeBackend,
    uniform::{MAX_VIEWS, NormalizedRect, UniformBuffer},
};

/// Number of layer descriptor sets, one per view so every view's layer squash
/// can be recorded in the same frame.
pub const LAYER_RUN_COUNT: usize = MAX_VIEWS;

/// Maximum number of sampled source images bound to one layer dispatch.
pub const MAX_IMAGES: usize = 32;

/// Number of distortion lookup images per view, one per colour channel.
pub const DISTORTION_IMAGES_PER_VIEW: usize = 3;

/// Shader binding slot numbers shared by every compute descriptor set layout.
///
/// # Example
///
/// ```
/// use render_compute::BindingSlots;
///
/// let slots = BindingSlots {
///     ubo: 7,
///     ..Default::default()
/// };
/// assert_eq!(slots.src, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlots {
    /// Sampled source images.
    pub src: u32,
    /// Sampled distortion lookup images.
    pub distortion: u32,
    /// The storage target image.
    pub target: u32,
    /// The uniform buffer.
    pub ubo: u32,
}

impl Default for BindingSlots {
    /// The slots used by the stock compositor shaders.
    fn default() -> Self {
        Self {
            src: 0,
            distortion: 1,
            target: 2,
            ubo: 3,
        }
    }
}

/// Pipelines for the per-layer composite pass.
pub struct LayerPipelines<B: ComputeBackend> {
    /// Layout the layer descriptor sets are allocated with.
    pub descriptor_set_layout: B::DescriptorSetLayout,
    /// Layout both pipelines were created with.
    pub pipeline_layout: B::PipelineLayout,
    /// Composites without reprojection.
    pub non_timewarp_pipeline: B::Pipeline,
    /// Composites with per-layer reprojection.
    pub timewarp_pipeline: B::Pipeline,
}

/// Pipelines and uniform buffer for the distortion passes.
pub struct DistortionPipelines<B: ComputeBackend> {
    /// Layout of the shared descriptor set.
    pub descriptor_set_layout: B::DescriptorSetLayout,
    /// Layout shared by the distortion, timewarp and clear pipelines.
    pub pipeline_layout: B::PipelineLayout,
    /// Distortion without reprojection.
    pub pipeline: B::Pipeline,
    /// Distortion with reprojection.
    pub timewarp_pipeline: B::Pipeline,
    /// Uniforms for both distortion pipelines.
    pub ubo: UniformBuffer<B>,
}

/// Pipeline and uniform buffer for the clear pass.
pub struct ClearPipeline<B: ComputeBackend> {
    /// Writes the clear colour inside each viewport.
    pub pipeline: B::Pipeline,
    /// Uniforms for the clear pipeline.
    pub ubo: UniformBuffer<B>,
}

/// Compute-specific objects.
pub struct ComputeResources<B: ComputeBackend> {
    /// Pool every compute descriptor set comes from, reset wholesale on `fini`.
    pub descriptor_pool: B::DescriptorPool,
    /// Binding slots of the compute shaders.
    pub bindings: BindingSlots,
    /// Layer composite pass.
    pub layer: LayerPipelines<B>,
    /// Distortion passes.
    pub distortion: DistortionPipelines<B>,
    /// Clear pass.
    pub clear: ClearPipeline<B>,
}

/// Standard samplers.
pub struct Samplers<B: ComputeBackend> {
    /// Linear filtering, clamped to edge.
    pub clamp_to_edge: B::Sampler,
    /// Neutral sampler bound where the shader ignores the image.
    pub mock: B::Sampler,
}

/// Per-device distortion data.
pub struct DistortionResources<B: ComputeBackend> {
    /// UV to tangent-angle rectangle per view.
    pub uv_to_tanangle: [NormalizedRect; MAX_VIEWS],
    /// Lookup images, [`DISTORTION_IMAGES_PER_VIEW`] consecutive entries per view.
    pub image_views: [B::ImageView; DISTORTION_IMAGES_PER_VIEW * MAX_VIEWS],
}

/// Everything the compute passes consume.
pub struct RenderResources<B: ComputeBackend> {
    /// API used to record.
    pub backend: B,
    /// Number of active views, `1..=MAX_VIEWS`.
    pub view_count: u32,
    /// Pool `cmd` is allocated from, reset at the start of every frame.
    pub cmd_pool: B::CommandPool,
    /// The command buffer all passes record into.
    pub cmd: B::CommandBuffer,
    /// Two timestamp queries bracketing the frame.
    pub query_pool: B::QueryPool,
    /// Standard samplers.
    pub samplers: Samplers<B>,
    /// Small colour image bound as source by the clear pass.
    pub mock_color_view: B::ImageView,
    /// Distortion lookup data.
    pub distortion: DistortionResources<B>,
    /// Compute pipelines and pools.
    pub compute: ComputeResources<B>,
}

impl<B: ComputeBackend> RenderResources<B> {
    /// Active view count as an index bound.
    ///
    /// # Panics
    ///
    /// Panics if `view_count` is zero or above [`MAX_VIEWS`].
    pub fn active_views(&self) -> usize {
        let count = self.view_count as usize;
        assert!(
            (1..=MAX_VIEWS).contains(&count),
            "view_count {count} outside 1..={MAX_VIEWS}"
        );
        count
    }
}

impl<B: ComputeBackend> std::fmt::Debug for RenderResources<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderResources")
            .field("view_count", &self.view_count)
            .field("cmd", &self.cmd)
            .field("query_pool", &self.query_pool)
            .field("descriptor_pool", &self.compute.descriptor_pool)
            .field("bindings", &self.compute.bindings)
            .finish_non_exhaustive()
    }
}
