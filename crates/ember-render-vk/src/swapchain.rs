// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::info;

use crate::config::PresentPreference;
use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VkResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(VkError::NoSurfaceFormat)
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the one mode every surface must support.
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .0
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .1
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// At least triple buffering; `max_image_count == 0` means no upper bound.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = 3.max(caps.min_image_count + 1);
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn plan_swapchain(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    framebuffer: (u32, u32),
    pref: PresentPreference,
) -> VkResult<SwapchainPlan> {
    Ok(SwapchainPlan {
        surface_format: choose_surface_format(formats)?,
        present_mode: choose_present_mode(modes, pref),
        extent: choose_extent(caps, framebuffer),
        image_count: choose_image_count(caps),
        pre_transform: caps.current_transform,
    })
}

/// Swapchain plus one color view per image.
pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Builds a swapchain for `surface`, chained to `previous` when given.
    /// The caller drops `previous` once this returns.
    pub unsafe fn create(
        instance: &ash::Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        ctx: &DeviceContext,
        framebuffer: (u32, u32),
        pref: PresentPreference,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        let caps = surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, surface)
            .context("surface capabilities")?;
        let formats = surface_loader
            .get_physical_device_surface_formats(ctx.phys, surface)
            .context("surface formats")?;
        let modes = surface_loader
            .get_physical_device_surface_present_modes(ctx.phys, surface)
            .context("surface present modes")?;

        let plan = plan_swapchain(&caps, &formats, &modes, framebuffer, pref)?;
        let (sharing_mode, family_indices) = ctx.families.sharing();

        info!(
            "swapchain: {:?}/{:?} {:?} {}x{} images(min={} max={} -> {}) sharing {:?}",
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            caps.min_image_count,
            caps.max_image_count,
            plan.image_count,
            sharing_mode
        );

        let loader = match previous {
            Some(p) => p.loader.clone(),
            None => swapchain::Device::new(instance, &ctx.device),
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: plan.image_count,
            image_format: plan.surface_format.format,
            image_color_space: plan.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: previous.map_or(vk::SwapchainKHR::null(), |p| p.handle),
            ..Default::default()
        };

        let handle = loader
            .create_swapchain(&info, None)
            .map_err(VkError::from)
            .context("create_swapchain")?;

        let mut sc = Self {
            device: ctx.device.clone(),
            loader,
            handle,
            format: plan.surface_format.format,
            extent: plan.extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        // `sc` owns the handle now; early returns below unwind through Drop.
        sc.images = sc.loader.get_swapchain_images(handle)?;
        sc.views.reserve(sc.images.len());
        for i in 0..sc.images.len() {
            let view = create_color_view(&sc.device, sc.images[i], sc.format, 1)?;
            sc.views.push(view);
        }
        Ok(sc)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &v in &self.views {
                self.device.destroy_image_view(v, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

pub(crate) unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    mip_levels: u32,
) -> VkResult<vk::ImageView> {
    create_view(device, image, format, vk::ImageAspectFlags::COLOR, mip_levels)
}

pub(crate) unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
) -> VkResult<vk::ImageView> {
    let ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device.create_image_view(&ci, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, cs: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: cs,
        }
    }

    fn same(a: vk::SurfaceFormatKHR, b: vk::SurfaceFormatKHR) -> bool {
        a.format == b.format && a.color_space == b.color_space
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert!(same(choose_surface_format(&formats).unwrap(), formats[1]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert!(same(choose_surface_format(&formats).unwrap(), formats[0]));
        assert!(matches!(
            choose_surface_format(&[]),
            Err(VkError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn present_mode_prefers_mailbox_then_fifo() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo_only = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        use PresentPreference::*;
        assert_eq!(choose_present_mode(&both, Mailbox), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&fifo_only, Mailbox), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&both, Fifo), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let c = caps(2, 8, (800, 600));
        assert_eq!(
            choose_extent(&c, (1920, 1080)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn extent_clamps_framebuffer_when_undefined() {
        let c = caps(2, 8, (u32::MAX, u32::MAX));
        assert_eq!(
            choose_extent(&c, (1280, 720)),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(
            choose_extent(&c, (10_000, 0)),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn image_count_bounds() {
        // max(3, min+1)
        assert_eq!(choose_image_count(&caps(1, 8, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(2, 8, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(3, 8, (1, 1))), 4);
        // clamped to max
        assert_eq!(choose_image_count(&caps(2, 2, (1, 1))), 2);
        // 0 means unbounded
        assert_eq!(choose_image_count(&caps(5, 0, (1, 1))), 6);
    }

    #[test]
    fn plan_combines_choices() {
        let c = caps(2, 0, (640, 480));
        let formats = [fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let plan = plan_swapchain(
            &c,
            &formats,
            &[vk::PresentModeKHR::FIFO],
            (1, 1),
            PresentPreference::Mailbox,
        )
        .unwrap();
        assert!(same(plan.surface_format, formats[0]));
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.extent.width, 640);
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
    }
}
