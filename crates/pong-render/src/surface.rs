// SPDX-License-Identifier: CEPL-1.0
//! Surface capability snapshot and the swap chain parameter choices derived
//! from it. Everything here is pure so it can be checked without a GPU.
use crate::RenderSize;

/// Colour formats the engine names explicitly. Anything else the surface
/// reports is carried through as its raw backend value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    B8G8R8A8Srgb,
    B8G8R8A8Unorm,
    R8G8B8A8Srgb,
    R8G8B8A8Unorm,
    Other(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    Other(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
    Other(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// `current_extent.width` value meaning "the application picks the size".
pub const EXTENT_UNDEFINED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    pub current_extent: Extent2D,
    pub min_image_extent: Extent2D,
    pub max_image_extent: Extent2D,
    /// Backend transform bits, passed back verbatim at chain creation.
    pub current_transform: u32,
}

/// Point-in-time query result. Re-queried for every chain build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

pub const PREFERRED_FORMAT: SurfaceFormat = SurfaceFormat {
    format: Format::B8G8R8A8Srgb,
    color_space: ColorSpace::SrgbNonlinear,
};

/// BGRA8 sRGB / sRGB-nonlinear if offered, otherwise the first entry.
/// `None` only for an empty list, which device selection already rejects.
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .copied()
        .find(|f| *f == PREFERRED_FORMAT)
        .or_else(|| formats.first().copied())
}

/// Mailbox when offered, otherwise FIFO (always available).
pub fn choose_present_mode(modes: &[PresentMode]) -> PresentMode {
    if modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

pub fn choose_extent(caps: &SurfaceCapabilities, window: RenderSize) -> Extent2D {
    if caps.current_extent.width != EXTENT_UNDEFINED {
        return caps.current_extent;
    }
    Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn choose_image_count(caps: &SurfaceCapabilities) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: Extent2D) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: current,
            min_image_extent: Extent2D::new(16, 16),
            max_image_extent: Extent2D::new(4096, 2048),
            current_transform: 1,
        }
    }

    fn fmt(format: Format, color_space: ColorSpace) -> SurfaceFormat {
        SurfaceFormat {
            format,
            color_space,
        }
    }

    #[test]
    fn fixed_current_extent_is_used_verbatim() {
        let c = caps(Extent2D::new(1280, 720));
        let e = choose_extent(&c, RenderSize::new(9000, 3));
        assert_eq!(e, Extent2D::new(1280, 720));
    }

    #[test]
    fn undefined_extent_clamps_window_size() {
        let c = caps(Extent2D::new(EXTENT_UNDEFINED, EXTENT_UNDEFINED));
        assert_eq!(
            choose_extent(&c, RenderSize::new(9000, 3)),
            Extent2D::new(4096, 16)
        );
        assert_eq!(
            choose_extent(&c, RenderSize::new(800, 600)),
            Extent2D::new(800, 600)
        );
    }

    #[test]
    fn preferred_format_wins_regardless_of_position() {
        let formats = [
            fmt(Format::R8G8B8A8Unorm, ColorSpace::SrgbNonlinear),
            fmt(Format::B8G8R8A8Srgb, ColorSpace::Other(1_000_104_002)),
            PREFERRED_FORMAT,
        ];
        assert_eq!(choose_surface_format(&formats), Some(PREFERRED_FORMAT));
    }

    #[test]
    fn srgb_format_with_wrong_color_space_is_not_preferred() {
        let formats = [
            fmt(Format::R8G8B8A8Unorm, ColorSpace::SrgbNonlinear),
            fmt(Format::B8G8R8A8Srgb, ColorSpace::Other(7)),
        ];
        let first = choose_surface_format(&formats);
        assert_eq!(first, Some(formats[0]));
        assert_eq!(choose_surface_format(&formats), first);
    }

    #[test]
    fn empty_format_list_has_no_choice() {
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox_then_fifo() {
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo, PresentMode::Mailbox]),
            PresentMode::Mailbox
        );
        assert_eq!(
            choose_present_mode(&[PresentMode::Immediate, PresentMode::FifoRelaxed]),
            PresentMode::Fifo
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut c = caps(Extent2D::new(1, 1));
        c.min_image_count = 2;
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);

        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);

        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
    }

    #[test]
    fn image_count_never_below_min() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let mut c = caps(Extent2D::new(1, 1));
                c.min_image_count = min;
                c.max_image_count = max;
                let n = choose_image_count(&c);
                assert!(n >= min);
                if max != 0 {
                    assert!(n <= max);
                }
            }
        }
    }
}
