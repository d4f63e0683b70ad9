// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::VkResult;
use crate::pipeline::MeshPipeline;
use crate::targets::RenderTargets;
use crate::transition::{transition, TrackedImage, Transition};

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const CLEAR_DEPTH: f32 = 1.0;

/// Everything one draw needs besides the images it writes.
#[derive(Clone, Copy, Debug)]
pub struct DrawInputs {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub desc_set: vk::DescriptorSet,
    pub extent: vk::Extent2D,
}

/// Swapchain image the frame resolves into.
pub struct PresentTarget<'a> {
    pub image: &'a mut TrackedImage,
    pub view: vk::ImageView,
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    // y flip lives in the projection
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Single-sample devices draw straight into the swapchain image.
fn resolves(targets: &RenderTargets) -> bool {
    targets.color.desc.samples != vk::SampleCountFlags::TYPE_1
}

// STRICT ORDER (record):
// 1) swapchain image -> color attachment
// 2) msaa color + depth -> attachment layouts
// 3) begin rendering (msaa resolves into the swapchain image)
// 4) pipeline, viewport/scissor, buffers, set, draw
// 5) end rendering, swapchain image -> present
pub unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    present: PresentTarget<'_>,
    targets: &mut RenderTargets,
    pipeline: &MeshPipeline,
    draw: &DrawInputs,
) -> VkResult<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    transition(device, cmd, present.image, Transition::COLOR_ATTACHMENT)?;
    let msaa = resolves(targets);
    if msaa {
        transition(
            device,
            cmd,
            &mut targets.color.tracked,
            Transition::SHARED_COLOR_ATTACHMENT,
        )?;
    }
    transition(device, cmd, &mut targets.depth.tracked, Transition::DEPTH_ATTACHMENT)?;

    let color_att = if msaa {
        vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: targets.color.view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            resolve_mode: vk::ResolveModeFlags::AVERAGE,
            resolve_image_view: present.view,
            resolve_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            ..Default::default()
        }
    } else {
        vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: present.view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            ..Default::default()
        }
    };
    let depth_att = vk::RenderingAttachmentInfo {
        s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
        image_view: targets.depth.view,
        image_layout: targets.depth.tracked.state(0).layout(),
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        clear_value: vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: CLEAR_DEPTH,
                stencil: 0,
            },
        },
        ..Default::default()
    };
    let rendering_info = vk::RenderingInfo {
        s_type: vk::StructureType::RENDERING_INFO,
        render_area: full_scissor(draw.extent),
        layer_count: 1,
        color_attachment_count: 1,
        p_color_attachments: &color_att,
        p_depth_attachment: &depth_att,
        ..Default::default()
    };
    device.cmd_begin_rendering(cmd, &rendering_info);

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
    let vp = full_viewport(draw.extent);
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
    let sc = full_scissor(draw.extent);
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));

    device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&draw.vertex_buffer), &[0]);
    device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
    device.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        pipeline.layout,
        0,
        std::slice::from_ref(&draw.desc_set),
        &[],
    );
    device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);

    device.cmd_end_rendering(cmd);
    transition(device, cmd, present.image, Transition::PRESENT)?;

    device.end_command_buffer(cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let e = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let vp = full_viewport(e);
        assert_eq!((vp.x, vp.y), (0.0, 0.0));
        assert_eq!((vp.width, vp.height), (1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        let sc = full_scissor(e);
        assert_eq!((sc.offset.x, sc.offset.y), (0, 0));
        assert_eq!(sc.extent, e);
    }

    #[test]
    fn present_transition_follows_color_attachment() {
        let mut img = TrackedImage::new("swapchain", vk::Image::null(), vk::ImageAspectFlags::COLOR, 1);
        for _ in 0..3 {
            let c = Transition::COLOR_ATTACHMENT;
            img.advance(img.all_levels(), c.old, c.new).unwrap();
            let p = Transition::PRESENT;
            img.advance(img.all_levels(), p.old, p.new).unwrap();
        }
        assert_eq!(img.uniform_state(), Some(crate::transition::ImageState::Present));
    }
}
