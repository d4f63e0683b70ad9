// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};
use crate::upload::{GpuImage, ImageDesc};

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal tiling supports depth attachments.
pub fn choose_depth_format<F>(query: F) -> VkResult<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| {
            query(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(VkError::NoDepthFormat)
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Multisampled color target (resolved into the swapchain image) and the
/// depth buffer. Both sized to the swapchain extent.
pub struct RenderTargets {
    pub color: GpuImage,
    pub depth: GpuImage,
}

impl RenderTargets {
    pub unsafe fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VkResult<Self> {
        let color = GpuImage::new(
            ctx,
            "msaa color",
            ImageDesc {
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples: ctx.msaa_samples,
                format: color_format,
                usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;
        let depth = GpuImage::new(
            ctx,
            "depth",
            ImageDesc {
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples: ctx.msaa_samples,
                format: depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: depth_aspect(depth_format),
            },
        )?;
        Ok(Self { color, depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supports(formats: &'static [vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties {
        move |f| vk::FormatProperties {
            optimal_tiling_features: if formats.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_d32() {
        let q = supports(&[vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT]);
        assert_eq!(choose_depth_format(q).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn falls_through_candidate_order() {
        let q = supports(&[vk::Format::D24_UNORM_S8_UINT]);
        let f = choose_depth_format(q).unwrap();
        assert_eq!(f, vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(
            depth_aspect(f),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn none_supported() {
        assert!(matches!(
            choose_depth_format(supports(&[])),
            Err(VkError::NoDepthFormat)
        ));
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
    }
}
