// SPDX-License-Identifier: CEPL-1.0
//! Device selection policy. Backends enumerate what the hardware reports
//! into [`DeviceCandidate`]s; the policy here decides which one is used.
use bitflags::bitflags;
use tracing::{info, warn};

use crate::error::{RenderError, RenderResult};

bitflags! {
    /// Multisample counts, bit-compatible with the Vulkan flag values.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SampleCounts: u32 {
        const TYPE_1 = 0x01;
        const TYPE_2 = 0x02;
        const TYPE_4 = 0x04;
        const TYPE_8 = 0x08;
        const TYPE_16 = 0x10;
        const TYPE_32 = 0x20;
        const TYPE_64 = 0x40;
    }
}

impl SampleCounts {
    /// Number of samples of a single-bit value.
    pub fn samples(self) -> u32 {
        if self.is_empty() {
            1
        } else {
            1 << self.bits().trailing_zeros()
        }
    }
}

/// Immutable facts about the chosen device the engine needs after startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    pub graphics_family: u32,
    pub present_family: u32,
    pub max_samples: SampleCounts,
}

impl DeviceProfile {
    pub fn shares_family(&self) -> bool {
        self.graphics_family == self.present_family
    }

    pub fn multisampled(&self) -> bool {
        self.max_samples != SampleCounts::TYPE_1
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

/// Everything the selector looks at for one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate<P> {
    pub handle: P,
    pub name: String,
    pub extensions_supported: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub has_surface_formats: bool,
    pub has_present_modes: bool,
    pub sampler_anisotropy: bool,
    pub color_sample_counts: SampleCounts,
    pub depth_sample_counts: SampleCounts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// Walks the families in order, remembering the latest graphics-capable
/// and present-capable index, and stops once both are known.
pub fn find_queue_families(families: &[QueueFamilyInfo]) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, family) in (0u32..).zip(families) {
        if family.graphics {
            graphics = Some(i);
        }
        if family.present {
            present = Some(i);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// Highest sample count both colour and depth attachments support.
pub fn max_usable_sample_count(color: SampleCounts, depth: SampleCounts) -> SampleCounts {
    let counts = color & depth;
    [
        SampleCounts::TYPE_64,
        SampleCounts::TYPE_32,
        SampleCounts::TYPE_16,
        SampleCounts::TYPE_8,
        SampleCounts::TYPE_4,
        SampleCounts::TYPE_2,
    ]
    .into_iter()
    .find(|c| counts.contains(*c))
    .unwrap_or(SampleCounts::TYPE_1)
}

fn rejection<P>(c: &DeviceCandidate<P>) -> Option<&'static str> {
    if !c.extensions_supported {
        return Some("missing required device extensions");
    }
    if find_queue_families(&c.queue_families).is_none() {
        return Some("no graphics and present queue families");
    }
    if !c.has_surface_formats || !c.has_present_modes {
        return Some("surface reports no formats or present modes");
    }
    if !c.sampler_anisotropy {
        return Some("sampler anisotropy unsupported");
    }
    None
}

/// Picks the first candidate meeting every requirement. Order is the
/// enumeration order; there is no ranking.
pub fn select_device<P: Copy>(
    candidates: &[DeviceCandidate<P>],
) -> RenderResult<(P, DeviceProfile)> {
    for c in candidates {
        if let Some(reason) = rejection(c) {
            warn!(device = %c.name, reason, "rejecting GPU");
            continue;
        }
        let Some(families) = find_queue_families(&c.queue_families) else {
            continue;
        };
        let profile = DeviceProfile {
            graphics_family: families.graphics,
            present_family: families.present,
            max_samples: max_usable_sample_count(c.color_sample_counts, c.depth_sample_counts),
        };
        info!(
            device = %c.name,
            graphics = profile.graphics_family,
            present = profile.present_family,
            samples = profile.max_samples.samples(),
            "selected GPU"
        );
        return Ok((c.handle, profile));
    }
    Err(RenderError::NoCapableDeviceFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: QueueFamilyInfo = QueueFamilyInfo {
        graphics: true,
        present: true,
    };
    const GFX: QueueFamilyInfo = QueueFamilyInfo {
        graphics: true,
        present: false,
    };
    const PRESENT: QueueFamilyInfo = QueueFamilyInfo {
        graphics: false,
        present: true,
    };

    fn capable(handle: u32) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle,
            name: format!("gpu{handle}"),
            extensions_supported: true,
            queue_families: vec![BOTH],
            has_surface_formats: true,
            has_present_modes: true,
            sampler_anisotropy: true,
            color_sample_counts: SampleCounts::TYPE_1 | SampleCounts::TYPE_4,
            depth_sample_counts: SampleCounts::TYPE_1 | SampleCounts::TYPE_4,
        }
    }

    #[test]
    fn first_capable_device_wins() {
        let list = [capable(7), capable(8)];
        let (handle, _) = select_device(&list).unwrap();
        assert_eq!(handle, 7);
    }

    #[test]
    fn incapable_devices_are_skipped() {
        let mut no_ext = capable(1);
        no_ext.extensions_supported = false;
        let mut no_present = capable(2);
        no_present.queue_families = vec![GFX];
        let mut no_formats = capable(3);
        no_formats.has_surface_formats = false;
        let mut no_modes = capable(4);
        no_modes.has_present_modes = false;
        let mut no_aniso = capable(5);
        no_aniso.sampler_anisotropy = false;

        let list = [no_ext, no_present, no_formats, no_modes, no_aniso, capable(6)];
        let (handle, _) = select_device(&list).unwrap();
        assert_eq!(handle, 6);
    }

    #[test]
    fn empty_survivor_set_is_an_error() {
        let mut only = capable(1);
        only.sampler_anisotropy = false;
        assert!(matches!(
            select_device(&[only]),
            Err(RenderError::NoCapableDeviceFound)
        ));
        assert!(matches!(
            select_device::<u32>(&[]),
            Err(RenderError::NoCapableDeviceFound)
        ));
    }

    #[test]
    fn split_queue_families_are_reported() {
        let mut c = capable(1);
        c.queue_families = vec![GFX, PRESENT];
        let (_, profile) = select_device(&[c]).unwrap();
        assert_eq!(profile.graphics_family, 0);
        assert_eq!(profile.present_family, 1);
        assert!(!profile.shares_family());
    }

    #[test]
    fn queue_search_stops_at_first_complete_pair() {
        let fams = [GFX, BOTH, BOTH];
        assert_eq!(
            find_queue_families(&fams),
            Some(QueueFamilies {
                graphics: 1,
                present: 1
            })
        );
        assert_eq!(find_queue_families(&[GFX, GFX]), None);
    }

    #[test]
    fn sample_count_is_highest_shared_bit() {
        let color = SampleCounts::TYPE_1 | SampleCounts::TYPE_2 | SampleCounts::TYPE_8;
        let depth = SampleCounts::TYPE_1 | SampleCounts::TYPE_2 | SampleCounts::TYPE_4;
        assert_eq!(max_usable_sample_count(color, depth), SampleCounts::TYPE_2);
        assert_eq!(
            max_usable_sample_count(SampleCounts::all(), SampleCounts::all()),
            SampleCounts::TYPE_64
        );
        assert_eq!(
            max_usable_sample_count(SampleCounts::TYPE_1, SampleCounts::all()),
            SampleCounts::TYPE_1
        );
    }

    #[test]
    fn samples_of_single_bit() {
        assert_eq!(SampleCounts::TYPE_1.samples(), 1);
        assert_eq!(SampleCounts::TYPE_8.samples(), 8);
        assert_eq!(SampleCounts::TYPE_64.samples(), 64);
    }
}
