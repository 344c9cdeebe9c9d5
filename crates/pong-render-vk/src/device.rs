// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use pong_render::device::{DeviceCandidate, DeviceProfile, QueueFamilyInfo};

use crate::convert::samples_from_vk;

const REQUIRED_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Gathers what the selection policy needs to know about every physical
/// device, in enumeration order.
pub unsafe fn enumerate_candidates(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<DeviceCandidate<vk::PhysicalDevice>>> {
    let physical = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;

    let mut candidates = Vec::with_capacity(physical.len());
    for phys in physical {
        let props = instance.get_physical_device_properties(phys);
        let features = instance.get_physical_device_features(phys);
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());

        let queue_families = instance
            .get_physical_device_queue_family_properties(phys)
            .iter()
            .enumerate()
            .map(|(i, q)| QueueFamilyInfo {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: surface_loader
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false),
            })
            .collect();

        // dynamic rendering and synchronization2 are core from 1.3
        let api = props.api_version;
        let core13 = vk::api_version_major(api) > 1 || vk::api_version_minor(api) >= 3;
        let extensions_supported = core13 && supports_extensions(instance, phys)?;

        // swap chain details are only meaningful once the extension exists
        let (has_surface_formats, has_present_modes) = if extensions_supported {
            (
                !surface_loader
                    .get_physical_device_surface_formats(phys, surface)
                    .unwrap_or_default()
                    .is_empty(),
                !surface_loader
                    .get_physical_device_surface_present_modes(phys, surface)
                    .unwrap_or_default()
                    .is_empty(),
            )
        } else {
            (false, false)
        };

        candidates.push(DeviceCandidate {
            handle: phys,
            name,
            extensions_supported,
            queue_families,
            has_surface_formats,
            has_present_modes,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            color_sample_counts: samples_from_vk(props.limits.framebuffer_color_sample_counts),
            depth_sample_counts: samples_from_vk(props.limits.framebuffer_depth_sample_counts),
        });
    }
    Ok(candidates)
}

unsafe fn supports_extensions(instance: &Instance, phys: vk::PhysicalDevice) -> Result<bool> {
    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties(device)")?;
    let has = |name: &CStr| {
        ext_props
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
    };
    Ok(REQUIRED_EXTENSIONS.iter().all(|&n| has(n)))
}

pub struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    profile: &DeviceProfile,
) -> Result<LogicalDevice> {
    // one queue per distinct family
    let priorities = [1.0_f32];
    let mut families = vec![profile.graphics_family];
    if !profile.shares_family() {
        families.push(profile.present_family);
    }
    let queue_infos: Vec<_> = families
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let supported = instance.get_physical_device_features(phys);

    // STRICT ORDER (feature pNext chain): feats13 -> chained after feats2.
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        synchronization2: vk::TRUE,
        dynamic_rendering: vk::TRUE,
        ..Default::default()
    };
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        features: vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            sample_rate_shading: supported.sample_rate_shading,
            ..Default::default()
        },
        ..Default::default()
    };
    feats2.p_next = (&mut feats13) as *mut _ as *mut _;

    let device_exts: Vec<*const c_char> = REQUIRED_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats2) as *mut _ as *const _,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;

    Ok(LogicalDevice {
        graphics_queue: device.get_device_queue(profile.graphics_family, 0),
        present_queue: device.get_device_queue(profile.present_family, 0),
        device,
    })
}
