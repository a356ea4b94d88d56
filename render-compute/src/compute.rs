//! Records the compositor's compute passes into a single command buffer.
//!
//! A [`ComputeContext`] borrows the renderer's [`RenderResources`] between
//! [`ComputeContext::init`] and [`ComputeContext::fini`]. Each frame is opened
//! with [`ComputeContext::begin`], which hands out a [`ComputeFrame`]; the
//! passes live on the frame, so they cannot be recorded outside of one.
//!
//! The examples run on the in-memory backend of the `testing` feature.
//!
#![cfg_attr(feature = "testing", doc = "```")]
#![cfg_attr(not(feature = "testing"), doc = "```ignore")]
//! use render_compute::{
//!     ComputeContext, NormalizedRect, ProjectionView, SampledImage, TargetImage, ViewportData,
//!     testing::{RecordingBackend, mock_resources},
//! };
//!
//! let resources = mock_resources(1);
//! let backend = &resources.backend;
//! let target: TargetImage<RecordingBackend> =
//!     TargetImage::new(backend.create_handle(), backend.create_handle());
//! let view: ProjectionView<RecordingBackend> = ProjectionView {
//!     source: SampledImage::new(backend.create_handle(), backend.create_handle()),
//!     src_norm_rect: NormalizedRect::FULL,
//!     viewport: ViewportData { x: 0, y: 0, width: 1920, height: 1080 },
//! };
//!
//! let mut ctx = ComputeContext::new();
//! ctx.init(&resources).unwrap();
//!
//! let mut frame = ctx.begin().unwrap();
//! frame.clear(&[view.viewport], target);
//! frame.projection(&[view], target);
//! frame.end().unwrap();
//!
//! ctx.fini();
//! ```
//!
//! The open frame keeps the context borrowed, so the context cannot be torn
//! down while recording:
//!
#![cfg_attr(feature = "testing", doc = "```compile_fail")]
#![cfg_attr(not(feature = "testing"), doc = "```ignore")]
//! use render_compute::{ComputeContext, testing::mock_resources};
//!
//! let resources = mock_resources(1);
//! let mut ctx = ComputeContext::new();
//! ctx.init(&resources).unwrap();
//!
//! let frame = ctx.begin().unwrap();
//! ctx.fini();
//! frame.end().unwrap();
//! ```

use std::fmt;

use glam::DMat4;
use smallvec::SmallVec;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{Access, ComputeBackend, ImageBarrier, ImageLayout, PipelineStage, SampledImage},
    bounded::BoundedVec,
    descriptor::{
        DistortionImages, LayerImages, ViewImages, update_compute_layer_descriptor_set,
        update_compute_shared_descriptor_set,
    },
    dispatch::{
        DISTORTION_DISPATCH_DEPTH, DispatchDims, calc_dispatch_dims_1_view,
        calc_dispatch_dims_views,
    },
    error::ComputeError,
    resources::{DISTORTION_IMAGES_PER_VIEW, LAYER_RUN_COUNT, RenderResources},
    timestamp::{QUERY_BEGIN, QUERY_COUNT, QUERY_END},
    timewarp::{Fov, Pose, calc_time_warp_matrix},
    uniform::{
        DistortionUboData, MAX_VIEWS, NormalizedRect, UniformBuffer, ViewUniforms, ViewportData,
    },
};

/// The storage image a pass writes.
pub struct TargetImage<B: ComputeBackend> {
    /// Image, used for layout transitions.
    pub image: B::Image,
    /// View bound as the storage target.
    pub view: B::ImageView,
}

impl<B: ComputeBackend> TargetImage<B> {
    /// Pairs `image` with its `view`.
    pub fn new(image: B::Image, view: B::ImageView) -> Self {
        Self { image, view }
    }
}

impl<B: ComputeBackend> Clone for TargetImage<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ComputeBackend> Copy for TargetImage<B> {}

impl<B: ComputeBackend> fmt::Debug for TargetImage<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetImage")
            .field("image", &self.image)
            .field("view", &self.view)
            .finish()
    }
}

/// One view of a projection layer.
pub struct ProjectionView<B: ComputeBackend> {
    /// Rendered eye image and the sampler to read it with.
    pub source: SampledImage<B>,
    /// Part of the source image holding this view, normalized.
    pub src_norm_rect: NormalizedRect,
    /// Where the view lands in the target.
    pub viewport: ViewportData,
}

impl<B: ComputeBackend> Clone for ProjectionView<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ComputeBackend> Copy for ProjectionView<B> {}

impl<B: ComputeBackend> fmt::Debug for ProjectionView<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionView")
            .field("source", &self.source)
            .field("src_norm_rect", &self.src_norm_rect)
            .field("viewport", &self.viewport)
            .finish()
    }
}

/// Poses needed to reproject one view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimewarpView {
    /// Pose the source image was rendered at.
    pub src_pose: Pose,
    /// Fov the source image was rendered with.
    pub src_fov: Fov,
    /// Latest predicted pose.
    pub new_pose: Pose,
}

struct Attached<'r, B: ComputeBackend> {
    r: &'r RenderResources<B>,
    layer_descriptor_sets: [B::DescriptorSet; LAYER_RUN_COUNT],
    shared_descriptor_set: B::DescriptorSet,
}

/// Descriptor sets and the borrowed resources the compute passes need.
pub struct ComputeContext<'r, B: ComputeBackend> {
    attached: Option<Attached<'r, B>>,
}

impl<B: ComputeBackend> Default for ComputeContext<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ComputeBackend> fmt::Debug for ComputeContext<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attached {
            Some(attached) => f
                .debug_struct("ComputeContext")
                .field("layer_descriptor_sets", &attached.layer_descriptor_sets)
                .field("shared_descriptor_set", &attached.shared_descriptor_set)
                .finish(),
            None => f.write_str("ComputeContext(detached)"),
        }
    }
}

type SetAllocation<B> = (
    [<B as ComputeBackend>::DescriptorSet; LAYER_RUN_COUNT],
    <B as ComputeBackend>::DescriptorSet,
);

fn allocate_descriptor_sets<B: ComputeBackend>(
    r: &RenderResources<B>,
) -> Result<SetAllocation<B>, ComputeError<B::Error>> {
    let compute = &r.compute;
    let allocate = |layout, what| {
        r.backend
            .allocate_descriptor_set(compute.descriptor_pool, layout)
            .map_err(|source| ComputeError::DescriptorAllocation { what, source })
    };

    let first = allocate(compute.layer.descriptor_set_layout, "layer")?;
    let mut layer = [first; LAYER_RUN_COUNT];
    for set in layer.iter_mut().skip(1) {
        *set = allocate(compute.layer.descriptor_set_layout, "layer")?;
    }
    let shared = allocate(compute.distortion.descriptor_set_layout, "shared")?;

    Ok((layer, shared))
}

impl<'r, B: ComputeBackend> ComputeContext<'r, B> {
    /// Creates a detached context.
    pub fn new() -> Self {
        Self { attached: None }
    }

    /// Returns `true` between a successful [`init`](Self::init) and
    /// [`fini`](Self::fini).
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Descriptor set of layer `slot`, if attached.
    pub fn layer_descriptor_set(&self, slot: usize) -> Option<B::DescriptorSet> {
        self.attached
            .as_ref()
            .and_then(|attached| attached.layer_descriptor_sets.get(slot).copied())
    }

    /// The set shared by the projection, time warp and clear passes, if attached.
    pub fn shared_descriptor_set(&self) -> Option<B::DescriptorSet> {
        self.attached
            .as_ref()
            .map(|attached| attached.shared_descriptor_set)
    }

    /// Attaches to `r` and allocates every descriptor set.
    ///
    /// On failure the descriptor pool is reset and the context stays
    /// detached.
    ///
    /// # Panics
    ///
    /// Panics if the context is already attached.
    pub fn init(&mut self, r: &'r RenderResources<B>) -> Result<(), ComputeError<B::Error>> {
        assert!(
            self.attached.is_none(),
            "compute context is already attached"
        );

        match allocate_descriptor_sets(r) {
            Ok((layer_descriptor_sets, shared_descriptor_set)) => {
                self.attached = Some(Attached {
                    r,
                    layer_descriptor_sets,
                    shared_descriptor_set,
                });
                info!(
                    "Compute context attached with {} layer descriptor sets",
                    LAYER_RUN_COUNT
                );
                Ok(())
            }
            Err(err) => {
                error!("Compute context init failed: {err}");
                if let Err(reset) = r.backend.reset_descriptor_pool(r.compute.descriptor_pool) {
                    error!("Failed to release partially allocated descriptor sets: {reset}");
                }
                Err(err)
            }
        }
    }

    /// Returns every descriptor set to the pool and detaches.
    ///
    /// # Panics
    ///
    /// Panics if the context is detached.
    pub fn fini(&mut self) {
        let Some(attached) = self.attached.take() else {
            panic!("fini called on a detached compute context");
        };

        let r = attached.r;
        if let Err(err) = r.backend.reset_descriptor_pool(r.compute.descriptor_pool) {
            error!("Failed to reset the compute descriptor pool: {err}");
        }
        info!("Compute context detached");
    }

    /// Opens the command buffer for a new frame.
    ///
    /// Resets the command pool and both timestamp queries, then writes the
    /// start timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the context is detached.
    pub fn begin(&mut self) -> Result<ComputeFrame<'_, 'r, B>, ComputeError<B::Error>> {
        let Some(attached) = self.attached.as_ref() else {
            panic!("begin called on a detached compute context");
        };
        let r = attached.r;

        r.backend.reset_command_pool(r.cmd_pool).map_err(|err| {
            error!("Failed to reset the compute command pool: {err}");
            ComputeError::ResetCommandPool(err)
        })?;
        r.backend.begin_command_buffer(r.cmd).map_err(|err| {
            error!("Failed to begin the compute command buffer: {err}");
            ComputeError::BeginCommandBuffer(err)
        })?;

        r.backend
            .cmd_reset_query_pool(r.cmd, r.query_pool, QUERY_BEGIN, QUERY_COUNT);
        r.backend
            .cmd_write_timestamp(r.cmd, PipelineStage::TopOfPipe, r.query_pool, QUERY_BEGIN);

        debug!("Compute frame begun");
        Ok(ComputeFrame {
            attached,
            ended: false,
        })
    }
}

/// An open command buffer.
///
/// Dropping a frame without calling [`end`](Self::end) leaves the command
/// buffer in the recording state; the next [`ComputeContext::begin`] resets
/// it.
pub struct ComputeFrame<'a, 'r, B: ComputeBackend> {
    attached: &'a Attached<'r, B>,
    ended: bool,
}

impl<B: ComputeBackend> fmt::Debug for ComputeFrame<'_, '_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeFrame")
            .field("cmd", &self.attached.r.cmd)
            .field("ended", &self.ended)
            .finish()
    }
}

impl<B: ComputeBackend> Drop for ComputeFrame<'_, '_, B> {
    fn drop(&mut self) {
        if !self.ended {
            warn!("Compute frame dropped without end; the command buffer is still recording");
        }
    }
}

fn bounded<T, const N: usize>(items: impl IntoIterator<Item = T>) -> BoundedVec<T, N> {
    BoundedVec::try_from_iter(items)
        .unwrap_or_else(|err| panic!("pass arguments exceed descriptor capacity: {err}"))
}

fn distortion_dims<B: ComputeBackend>(
    r: &RenderResources<B>,
    viewports: &[ViewportData],
) -> DispatchDims {
    let count = r.active_views();
    assert_eq!(
        viewports.len(),
        count,
        "pass given {} views but {count} are active",
        viewports.len()
    );

    let dims = calc_dispatch_dims_views(viewports);
    assert!(
        !dims.is_empty(),
        "every viewport is empty, nothing to dispatch: {viewports:?}"
    );
    dims
}

fn distortion_pre_barrier<I>(image: I) -> ImageBarrier<I> {
    ImageBarrier {
        image,
        src_access: Access::None,
        dst_access: Access::ShaderWrite,
        old_layout: ImageLayout::Undefined,
        new_layout: ImageLayout::General,
        src_stage: PipelineStage::AllCommands,
        dst_stage: PipelineStage::AllCommands,
    }
}

fn distortion_post_barrier<I>(image: I) -> ImageBarrier<I> {
    ImageBarrier {
        image,
        src_access: Access::ShaderWrite,
        dst_access: Access::MemoryRead,
        old_layout: ImageLayout::General,
        new_layout: ImageLayout::PresentSrc,
        src_stage: PipelineStage::ComputeShader,
        dst_stage: PipelineStage::TopOfPipe,
    }
}

fn layer_pre_barrier<I>(image: I) -> ImageBarrier<I> {
    ImageBarrier {
        image,
        src_access: Access::None,
        dst_access: Access::ShaderWrite,
        old_layout: ImageLayout::Undefined,
        new_layout: ImageLayout::General,
        src_stage: PipelineStage::TopOfPipe,
        dst_stage: PipelineStage::ComputeShader,
    }
}

// The squashed layer is sampled by the distortion pass that follows.
fn layer_post_barrier<I>(image: I) -> ImageBarrier<I> {
    ImageBarrier {
        image,
        src_access: Access::ShaderWrite,
        dst_access: Access::ShaderRead,
        old_layout: ImageLayout::General,
        new_layout: ImageLayout::ShaderReadOnly,
        src_stage: PipelineStage::ComputeShader,
        dst_stage: PipelineStage::ComputeShader,
    }
}

impl<B: ComputeBackend> ComputeFrame<'_, '_, B> {
    /// Composites `sources` into `target` using layer descriptor set `slot`.
    ///
    /// `ubo` holds the per-layer data and is written by the caller. The
    /// target ends up in [`ImageLayout::ShaderReadOnly`] for a following
    /// distortion pass to sample.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [`LAYER_RUN_COUNT`], if `viewport` is
    /// empty or if `sources` is empty.
    #[instrument(level = "trace", skip(self, ubo, sources, target, viewport))]
    pub fn layers(
        &mut self,
        slot: usize,
        ubo: B::Buffer,
        sources: &LayerImages<B>,
        target: TargetImage<B>,
        viewport: &ViewportData,
        do_timewarp: bool,
    ) {
        assert!(
            slot < LAYER_RUN_COUNT,
            "layer slot {slot} out of range 0..{LAYER_RUN_COUNT}"
        );
        let dims = calc_dispatch_dims_1_view(viewport);
        assert!(
            !dims.is_empty(),
            "layer viewport is empty, nothing to dispatch: {viewport:?}"
        );
        assert!(
            !sources.is_empty(),
            "layer pass needs at least one source image"
        );

        let r = self.attached.r;
        let layer = &r.compute.layer;
        let set = self.attached.layer_descriptor_sets[slot];

        update_compute_layer_descriptor_set(
            &r.backend,
            &r.compute.bindings,
            sources,
            target.view,
            ubo,
            set,
        );

        let pipeline = if do_timewarp {
            layer.timewarp_pipeline
        } else {
            layer.non_timewarp_pipeline
        };

        r.backend
            .cmd_image_barrier(r.cmd, &layer_pre_barrier(target.image));
        r.backend.cmd_bind_pipeline(r.cmd, pipeline);
        r.backend
            .cmd_bind_descriptor_set(r.cmd, layer.pipeline_layout, set);
        r.backend.cmd_dispatch(r.cmd, dims.width, dims.height, 1);
        r.backend
            .cmd_image_barrier(r.cmd, &layer_post_barrier(target.image));
    }

    /// Distorts one projection layer into `target`, without reprojection.
    ///
    /// # Panics
    ///
    /// Panics unless there is one view per active view, or if every
    /// viewport is empty.
    #[instrument(level = "trace", skip_all)]
    pub fn projection(&mut self, views: &[ProjectionView<B>], target: TargetImage<B>) {
        self.record_projection(views, None, target);
    }

    /// Distorts one projection layer into `target`, reprojecting each view
    /// by its [`TimewarpView`].
    ///
    /// # Panics
    ///
    /// As [`projection`](Self::projection), and if `warps` and `views` differ
    /// in length.
    #[instrument(level = "trace", skip_all)]
    pub fn projection_timewarp(
        &mut self,
        views: &[ProjectionView<B>],
        warps: &[TimewarpView],
        target: TargetImage<B>,
    ) {
        assert_eq!(
            warps.len(),
            views.len(),
            "one time warp per view required"
        );
        self.record_projection(views, Some(warps), target);
    }

    /// Fills each viewport of `target` with the clear colour.
    ///
    /// # Panics
    ///
    /// Panics unless there is one viewport per active view, or if every
    /// viewport is empty.
    #[instrument(level = "trace", skip_all)]
    pub fn clear(&mut self, viewports: &[ViewportData], target: TargetImage<B>) {
        let r = self.attached.r;
        let dims = distortion_dims(r, viewports);

        let uniforms: SmallVec<[ViewUniforms; MAX_VIEWS]> = viewports
            .iter()
            .map(|viewport| ViewUniforms {
                viewport: *viewport,
                pre_transform: NormalizedRect::FULL,
                transform: DMat4::IDENTITY,
                post_transform: NormalizedRect::FULL,
            })
            .collect();

        let mock = SampledImage::new(r.samplers.mock, r.mock_color_view);
        let sources: ViewImages<B> = bounded(viewports.iter().map(|_| mock));
        let distortion: DistortionImages<B> = bounded(
            r.distortion.image_views[..DISTORTION_IMAGES_PER_VIEW * viewports.len()]
                .iter()
                .map(|&view| SampledImage::new(r.samplers.mock, view)),
        );

        self.record_distortion(
            r.compute.clear.pipeline,
            &r.compute.clear.ubo,
            &DistortionUboData::from_views(&uniforms),
            &sources,
            &distortion,
            target,
            dims,
        );
    }

    /// Writes the end timestamp and closes the command buffer.
    pub fn end(mut self) -> Result<(), ComputeError<B::Error>> {
        self.ended = true;
        let r = self.attached.r;

        r.backend
            .cmd_write_timestamp(r.cmd, PipelineStage::BottomOfPipe, r.query_pool, QUERY_END);
        r.backend.end_command_buffer(r.cmd).map_err(|err| {
            error!("Failed to end the compute command buffer: {err}");
            ComputeError::EndCommandBuffer(err)
        })?;

        debug!("Compute frame recorded");
        Ok(())
    }

    fn record_projection(
        &mut self,
        views: &[ProjectionView<B>],
        warps: Option<&[TimewarpView]>,
        target: TargetImage<B>,
    ) {
        let r = self.attached.r;
        let viewports: SmallVec<[ViewportData; MAX_VIEWS]> =
            views.iter().map(|view| view.viewport).collect();
        let dims = distortion_dims(r, &viewports);

        let uniforms: SmallVec<[ViewUniforms; MAX_VIEWS]> = views
            .iter()
            .enumerate()
            .map(|(i, view)| ViewUniforms {
                viewport: view.viewport,
                pre_transform: r.distortion.uv_to_tanangle[i],
                transform: warps.map_or(DMat4::IDENTITY, |warps| {
                    calc_time_warp_matrix(&warps[i].src_pose, &warps[i].src_fov, &warps[i].new_pose)
                }),
                post_transform: view.src_norm_rect,
            })
            .collect();

        let sources: ViewImages<B> = bounded(views.iter().map(|view| view.source));
        let distortion: DistortionImages<B> = bounded(
            r.distortion.image_views[..DISTORTION_IMAGES_PER_VIEW * views.len()]
                .iter()
                .map(|&view| SampledImage::new(r.samplers.clamp_to_edge, view)),
        );

        let pipelines = &r.compute.distortion;
        let pipeline = if warps.is_some() {
            pipelines.timewarp_pipeline
        } else {
            pipelines.pipeline
        };

        self.record_distortion(
            pipeline,
            &pipelines.ubo,
            &DistortionUboData::from_views(&uniforms),
            &sources,
            &distortion,
            target,
            dims,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record_distortion(
        &mut self,
        pipeline: B::Pipeline,
        ubo: &UniformBuffer<B>,
        data: &DistortionUboData,
        sources: &ViewImages<B>,
        distortion: &DistortionImages<B>,
        target: TargetImage<B>,
        dims: DispatchDims,
    ) {
        let r = self.attached.r;

        ubo.write(data);
        update_compute_shared_descriptor_set(
            &r.backend,
            &r.compute.bindings,
            sources,
            distortion,
            target.view,
            ubo.buffer(),
            self.attached.shared_descriptor_set,
        );

        r.backend
            .cmd_image_barrier(r.cmd, &distortion_pre_barrier(target.image));
        r.backend.cmd_bind_pipeline(r.cmd, pipeline);
        r.backend.cmd_bind_descriptor_set(
            r.cmd,
            r.compute.distortion.pipeline_layout,
            self.attached.shared_descriptor_set,
        );
        r.backend.cmd_dispatch(
            r.cmd,
            dims.width,
            dims.height,
            DISTORTION_DISPATCH_DEPTH,
        );
        r.backend
            .cmd_image_barrier(r.cmd, &distortion_post_barrier(target.image));
    }
}
