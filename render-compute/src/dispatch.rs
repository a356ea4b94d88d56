//! Work-group sizing for the compute passes.
//!
//! All compositor shaders run with an 8x8 local size, so the number of groups
//! for a target region is the ceiling of its extent divided by the tile size.
//! Shaders bounds-check against the viewport, which lets a single dispatch
//! cover several views of different sizes.

use crate::uniform::ViewportData;

/// Edge length of the square work-group tile, must match the shaders.
pub const WORKGROUP_SIZE: u32 = 8;

/// Z group count of the distortion and clear passes, one slice per eye.
pub const DISTORTION_DISPATCH_DEPTH: u32 = 2;

/// Work-group counts for the x and y dimensions of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchDims {
    /// Groups along the x axis.
    pub width: u32,
    /// Groups along the y axis.
    pub height: u32,
}

impl DispatchDims {
    /// Returns `true` if either dimension would dispatch no work.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Integer division rounding towards positive infinity.
///
/// # Panics
///
/// Panics if `divisor` is zero.
pub fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Group counts covering a single viewport.
pub fn calc_dispatch_dims_1_view(view: &ViewportData) -> DispatchDims {
    DispatchDims {
        width: ceil_div(view.width, WORKGROUP_SIZE),
        height: ceil_div(view.height, WORKGROUP_SIZE),
    }
}

/// Group counts covering the largest extent of all `views`.
///
/// Width and height are maximised independently, so the result covers every
/// view even when none of them is the largest in both dimensions.
pub fn calc_dispatch_dims_views(views: &[ViewportData]) -> DispatchDims {
    let (width, height) = views.iter().fold((0, 0), |(w, h), view| {
        (w.max(view.width), h.max(view.height))
    });

    DispatchDims {
        width: ceil_div(width, WORKGROUP_SIZE),
        height: ceil_div(height, WORKGROUP_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(width: u32, height: u32) -> ViewportData {
        ViewportData {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    #[test]
    #[should_panic]
    fn ceil_div_by_zero_panics() {
        ceil_div(1, 0);
    }

    #[test]
    fn ceil_div_bounds() {
        for w in 1..=4096u32 {
            let groups = ceil_div(w, WORKGROUP_SIZE);
            assert!(groups * WORKGROUP_SIZE >= w, "w = {w}");
            assert!((groups - 1) * WORKGROUP_SIZE < w, "w = {w}");
        }
    }

    #[test]
    fn single_view_examples() {
        assert_eq!(
            calc_dispatch_dims_1_view(&viewport(1920, 1080)),
            DispatchDims {
                width: 240,
                height: 135
            }
        );
        assert_eq!(
            calc_dispatch_dims_1_view(&viewport(1, 1)),
            DispatchDims {
                width: 1,
                height: 1
            }
        );
        assert_eq!(
            calc_dispatch_dims_1_view(&viewport(9, 17)),
            DispatchDims {
                width: 2,
                height: 3
            }
        );
    }

    #[test]
    fn multi_view_takes_componentwise_max() {
        let views = [viewport(1000, 16), viewport(8, 900)];
        let dims = calc_dispatch_dims_views(&views);
        assert_eq!(dims, calc_dispatch_dims_1_view(&viewport(1000, 900)));
    }

    #[test]
    fn multi_view_is_order_independent() {
        let a = viewport(1440, 1600);
        let b = viewport(1432, 1608);
        assert_eq!(
            calc_dispatch_dims_views(&[a, b]),
            calc_dispatch_dims_views(&[b, a])
        );
    }

    #[test]
    fn viewport_offset_does_not_change_dims() {
        let mut shifted = viewport(64, 64);
        shifted.x = 512;
        shifted.y = 37;
        assert_eq!(
            calc_dispatch_dims_1_view(&shifted),
            calc_dispatch_dims_1_view(&viewport(64, 64))
        );
    }

    #[test]
    fn degenerate_views() {
        assert!(calc_dispatch_dims_1_view(&viewport(0, 10)).is_empty());
        assert!(calc_dispatch_dims_views(&[]).is_empty());
        // A disabled view is covered by its sibling.
        let dims = calc_dispatch_dims_views(&[viewport(0, 0), viewport(16, 16)]);
        assert!(!dims.is_empty());
    }
}
