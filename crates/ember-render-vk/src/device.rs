// SPDX-License-Identifier: CEPL-1.0
use std::ffi::c_char;

use anyhow::{Context, Result};
use ash::vk;
use tracing::info;

use crate::error::VkError;
use crate::instance::InstanceContext;
use crate::negotiate::{
    max_usable_sample_count, query_candidates, select_device, select_queue_families,
    DeviceFeatures, DeviceRequirements, QueueFamilies, REQUIRED_DEVICE_EXTENSIONS,
};

/// Selected physical device, its logical device and queues.
///
/// Immutable after creation. Must outlive every object created from it.
pub struct DeviceContext {
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub msaa_samples: vk::SampleCountFlags,
    pub sample_rate_shading: bool,
    pub props: vk::PhysicalDeviceProperties,
    pub memory_props: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    // STRICT ORDER (feature pNext chain):
    // features2 -> vulkan13 -> extended_dynamic_state
    // The structs must outlive create_device.
    pub unsafe fn new(inst: &InstanceContext) -> Result<Self> {
        let candidates = query_candidates(&inst.instance, &inst.surface_loader, inst.surface)
            .context("query physical devices")?;
        let req = DeviceRequirements::default();
        let list: Vec<_> = candidates.iter().map(|(_, c)| c.clone()).collect();
        let idx = select_device(&list, &req)?;
        let (phys, cand) = &candidates[idx];
        let phys = *phys;

        let families = select_queue_families(&cand.queue_families)?;
        let msaa_samples = max_usable_sample_count(cand.sample_counts);
        let sample_rate_shading = cand.features.contains(DeviceFeatures::SAMPLE_RATE_SHADING);
        info!(
            "device: {} | graphics q{} present q{} | msaa {:?} | sample shading {}",
            cand.name, families.graphics, families.present, msaa_samples, sample_rate_shading
        );

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let core = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            sample_rate_shading: if sample_rate_shading { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        let mut f13 = vk::PhysicalDeviceVulkan13Features {
            synchronization2: vk::TRUE,
            dynamic_rendering: vk::TRUE,
            ..Default::default()
        };
        let mut eds = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT {
            extended_dynamic_state: vk::TRUE,
            ..Default::default()
        };
        let mut feats2 = vk::PhysicalDeviceFeatures2::default()
            .features(core)
            .push_next(&mut f13)
            .push_next(&mut eds);

        let ext_ptrs: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect();

        let dinfo = vk::DeviceCreateInfo::default()
            .push_next(&mut feats2)
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_ptrs);

        let device = inst
            .instance
            .create_device(phys, &dinfo, None)
            .map_err(VkError::from)
            .context("create_device")?;

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);

        Ok(Self {
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
            msaa_samples,
            sample_rate_shading,
            props: inst.instance.get_physical_device_properties(phys),
            memory_props: inst.instance.get_physical_device_memory_properties(phys),
        })
    }

    pub fn max_anisotropy(&self) -> f32 {
        self.props.limits.max_sampler_anisotropy
    }

    pub unsafe fn wait_idle(&self) {
        self.device.device_wait_idle().ok();
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}
