//! Compute-shader command recording for an XR compositor.
//!
//! The crate records the compute passes that turn rendered eye images into
//! the image handed to the display: layer squashing, lens distortion
//! correction with optional rotational reprojection ("timewarp") and
//! clearing. It does not create GPU objects; the renderer owns them in a
//! [`RenderResources`] and the passes record against it through a
//! [`ComputeBackend`].
//!
//! - [`ComputeContext`] and [`ComputeFrame`] sequence a frame.
//! - [`dispatch`] sizes work groups.
//! - [`timewarp`] builds reprojection matrices.
//! - [`descriptor`] fills descriptor sets.
//! - [`backend::vulkan`] records with `ash`. The `testing` module, behind the
//!   feature of the same name, records in memory.
#![deny(missing_docs, clippy::unwrap_used)]

pub mod backend;
pub mod bounded;
pub mod compute;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod resources;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timestamp;
pub mod timewarp;
pub mod uniform;

pub use glam;

pub use crate::{
    backend::{
        Access, ComputeBackend, DescriptorWrite, ImageBarrier, ImageLayout, PipelineStage,
        SampledImage,
    },
    bounded::{BoundedVec, CapacityError},
    compute::{ComputeContext, ComputeFrame, ProjectionView, TargetImage, TimewarpView},
    descriptor::{
        DistortionImages, LayerImages, ViewImages, update_compute_descriptor_set_target,
        update_compute_layer_descriptor_set, update_compute_shared_descriptor_set,
    },
    dispatch::{
        DISTORTION_DISPATCH_DEPTH, DispatchDims, WORKGROUP_SIZE, calc_dispatch_dims_1_view,
        calc_dispatch_dims_views,
    },
    error::ComputeError,
    resources::{
        BindingSlots, ClearPipeline, ComputeResources, DISTORTION_IMAGES_PER_VIEW,
        DistortionPipelines, DistortionResources, LAYER_RUN_COUNT, LayerPipelines, MAX_IMAGES,
        RenderResources, Samplers,
    },
    timestamp::{GpuTimestamps, QUERY_BEGIN, QUERY_END},
    timewarp::{Fov, Pose, calc_time_warp_matrix, projection_matrix},
    uniform::{
        DistortionUboData, MAX_VIEWS, MappedMemory, NormalizedRect, UniformBuffer, ViewUniforms,
        ViewportData,
    },
};
