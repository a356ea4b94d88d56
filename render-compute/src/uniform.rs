//! Uniform data shared with the distortion and clear shaders.
//!
//! The layouts here mirror the std140 blocks declared by the shaders, every
//! member is 16-byte aligned so `#[repr(C)]` matches without padding fields.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use glam::DMat4;
use parking_lot::Mutex;

use crate::backend::ComputeBackend;

/// Maximum number of views (eyes) the compute passes handle.
pub const MAX_VIEWS: usize = 2;

/// Pixel rectangle in the target image that one view writes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ViewportData {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Rectangle in normalized or tangent space, `x`/`y` origin plus extent.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct NormalizedRect {
    /// Origin x.
    pub x: f32,
    /// Origin y.
    pub y: f32,
    /// Extent along x.
    pub w: f32,
    /// Extent along y.
    pub h: f32,
}

impl NormalizedRect {
    /// The whole `[0, 1]` square.
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Contents of the distortion (and clear) uniform buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DistortionUboData {
    /// Target rectangle per view.
    pub views: [ViewportData; MAX_VIEWS],
    /// UV to tangent-angle mapping per view, static for a device.
    pub pre_transforms: [NormalizedRect; MAX_VIEWS],
    /// Normalized source rectangle per view.
    pub post_transforms: [NormalizedRect; MAX_VIEWS],
    /// Column-major reprojection matrix per view.
    pub transforms: [[[f32; 4]; 4]; MAX_VIEWS],
}

impl Default for DistortionUboData {
    fn default() -> Self {
        Self {
            views: [ViewportData::default(); MAX_VIEWS],
            pre_transforms: [NormalizedRect::FULL; MAX_VIEWS],
            post_transforms: [NormalizedRect::FULL; MAX_VIEWS],
            transforms: [glam::Mat4::IDENTITY.to_cols_array_2d(); MAX_VIEWS],
        }
    }
}

/// Everything the distortion shaders need for one view.
///
/// The transform stays in double precision until [`DistortionUboData::from_views`]
/// packs it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewUniforms {
    /// Where the view lands in the target.
    pub viewport: ViewportData,
    /// UV to tangent-angle rectangle.
    pub pre_transform: NormalizedRect,
    /// Identity or time warp matrix.
    pub transform: DMat4,
    /// Normalized source rectangle.
    pub post_transform: NormalizedRect,
}

impl DistortionUboData {
    /// Packs per-view uniforms, truncating transforms to `f32`.
    ///
    /// Views past `views.len()` keep their defaults.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_VIEWS`] views are given.
    pub fn from_views(views: &[ViewUniforms]) -> Self {
        assert!(
            views.len() <= MAX_VIEWS,
            "{} views exceed the uniform capacity of {MAX_VIEWS}",
            views.len()
        );

        let mut data = Self::default();
        for (i, view) in views.iter().enumerate() {
            data.views[i] = view.viewport;
            data.pre_transforms[i] = view.pre_transform;
            data.transforms[i] = view.transform.as_mat4().to_cols_array_2d();
            data.post_transforms[i] = view.post_transform;
        }
        data
    }
}

/// Host-visible memory backing a persistently mapped buffer.
pub trait MappedMemory: Send {
    /// Read access to the mapped range.
    fn bytes(&self) -> &[u8];
    /// Write access to the mapped range.
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl MappedMemory for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// A uniform buffer together with its persistent host mapping.
pub struct UniformBuffer<B: ComputeBackend> {
    buffer: B::Buffer,
    mapping: Mutex<B::Mapping>,
}

impl<B: ComputeBackend> UniformBuffer<B> {
    /// Wraps an already created and mapped buffer.
    pub fn new(buffer: B::Buffer, mapping: B::Mapping) -> Self {
        Self {
            buffer,
            mapping: Mutex::new(mapping),
        }
    }

    /// The GPU handle, bound over its whole range.
    pub fn buffer(&self) -> B::Buffer {
        self.buffer
    }

    /// Overwrites the start of the mapping with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the mapping is smaller than `T`.
    pub fn write<T: Pod>(&self, value: &T) {
        let src = bytemuck::bytes_of(value);
        let mut mapping = self.mapping.lock();
        let dst = mapping.bytes_mut();
        assert!(
            dst.len() >= src.len(),
            "uniform mapping of {} bytes cannot hold {} bytes",
            dst.len(),
            src.len()
        );
        dst[..src.len()].copy_from_slice(src);
    }

    /// Reads the start of the mapping back as `T`.
    ///
    /// # Panics
    ///
    /// Panics if the mapping is smaller than `T`.
    pub fn read<T: Pod>(&self) -> T {
        let mapping = self.mapping.lock();
        let bytes = mapping.bytes();
        assert!(
            bytes.len() >= size_of::<T>(),
            "uniform mapping of {} bytes cannot hold {} bytes",
            bytes.len(),
            size_of::<T>()
        );
        bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()])
    }
}

impl<B: ComputeBackend> std::fmt::Debug for UniformBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBuffer")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBackend;

    #[test]
    fn ubo_layout_is_std140_packed() {
        assert_eq!(size_of::<ViewportData>(), 16);
        assert_eq!(size_of::<NormalizedRect>(), 16);
        assert_eq!(
            size_of::<DistortionUboData>(),
            MAX_VIEWS * (16 + 16 + 16 + 64)
        );
    }

    #[test]
    fn from_views_truncates_transform() {
        let transform = DMat4::from_cols_array(&[
            1.0 + 1e-12,
            0.0,
            0.0,
            0.0,
            0.0,
            2.0,
            0.0,
            0.0,
            0.0,
            0.0,
            3.0,
            -1.0,
            0.0,
            0.0,
            0.5,
            0.0,
        ]);
        let data = DistortionUboData::from_views(&[ViewUniforms {
            viewport: ViewportData {
                x: 0,
                y: 0,
                width: 100,
                height: 50,
            },
            pre_transform: NormalizedRect::FULL,
            transform,
            post_transform: NormalizedRect {
                x: 0.5,
                y: 0.0,
                w: 0.5,
                h: 1.0,
            },
        }]);

        assert_eq!(data.transforms[0][0][0], 1.0f32);
        assert_eq!(data.transforms[0][2][3], -1.0f32);
        assert_eq!(data.transforms[0][3][2], 0.5f32);
        assert_eq!(data.views[0].width, 100);
        assert_eq!(data.post_transforms[0].x, 0.5);
        // Untouched view keeps its identity default.
        assert_eq!(data.transforms[1], glam::Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    #[should_panic(expected = "exceed the uniform capacity")]
    fn from_views_rejects_too_many_views() {
        let view = ViewUniforms {
            viewport: ViewportData::default(),
            pre_transform: NormalizedRect::FULL,
            transform: DMat4::IDENTITY,
            post_transform: NormalizedRect::FULL,
        };
        let _ = DistortionUboData::from_views(&[view; MAX_VIEWS + 1]);
    }

    #[test]
    fn write_then_read_through_mapping() {
        let backend = RecordingBackend::new();
        let ubo: UniformBuffer<RecordingBackend> =
            UniformBuffer::new(backend.create_handle(), vec![0u8; 256]);

        let mut data = DistortionUboData::default();
        data.views[1] = ViewportData {
            x: 4,
            y: 8,
            width: 15,
            height: 16,
        };
        ubo.write(&data);
        assert_eq!(ubo.read::<DistortionUboData>(), data);
    }

    #[test]
    #[should_panic(expected = "cannot hold")]
    fn write_into_short_mapping_panics() {
        let backend = RecordingBackend::new();
        let ubo: UniformBuffer<RecordingBackend> =
            UniformBuffer::new(backend.create_handle(), vec![0u8; 8]);
        ubo.write(&DistortionUboData::default());
    }
}
