// SPDX-License-Identifier: CEPL-1.0
//! Image layout state machine.
//!
//! Every image the engine barriers carries a [`TrackedImage`] with one
//! [`ImageState`] per mip level. Barriers check the recorded state before
//! they are written into a command buffer, so a wrong `old_layout` shows up
//! as [`VkError::LayoutMismatch`] instead of a validation-layer message (or
//! silent corruption with validation off).

use std::ops::Range;

use ash::vk;

use crate::error::{VkError, VkResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageState {
    Undefined,
    ColorAttachment,
    DepthAttachment,
    TransferDst,
    TransferSrc,
    ShaderReadOnly,
    Present,
}

impl ImageState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

/// A synchronization2 barrier description, minus the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub old: ImageState,
    pub new: ImageState,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

impl Transition {
    /// Swapchain image, previous contents discarded. The source stage
    /// matches the acquire semaphore's wait stage so the layout change
    /// happens after the image is released by the presentation engine.
    pub const COLOR_ATTACHMENT: Self = Self {
        old: ImageState::Undefined,
        new: ImageState::ColorAttachment,
        src_access: vk::AccessFlags2::empty(),
        dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    };

    /// Multisampled color target. One image serves every frame in flight,
    /// so the clear waits for the previous frame's color writes.
    pub const SHARED_COLOR_ATTACHMENT: Self = Self {
        old: ImageState::Undefined,
        new: ImageState::ColorAttachment,
        src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    };

    /// Depth target, shared across frames in flight like the color target.
    pub const DEPTH_ATTACHMENT: Self = Self {
        old: ImageState::Undefined,
        new: ImageState::DepthAttachment,
        src_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        src_stage: FRAGMENT_TESTS,
        dst_stage: FRAGMENT_TESTS,
    };

    pub const PRESENT: Self = Self {
        old: ImageState::ColorAttachment,
        new: ImageState::Present,
        src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags2::empty(),
        src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
    };
}

#[derive(Clone, Debug)]
pub struct TrackedImage {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    name: &'static str,
    levels: Vec<ImageState>,
}

impl TrackedImage {
    pub fn new(
        name: &'static str,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Self {
        Self {
            image,
            aspect,
            name,
            levels: vec![ImageState::Undefined; mip_levels.max(1) as usize],
        }
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn state(&self, level: u32) -> ImageState {
        self.levels[level as usize]
    }

    /// Single state shared by every level, if there is one.
    pub fn uniform_state(&self) -> Option<ImageState> {
        let first = self.levels[0];
        self.levels.iter().all(|s| *s == first).then_some(first)
    }

    pub fn all_levels(&self) -> Range<u32> {
        0..self.mip_levels()
    }

    /// Checks `old` against the recorded state of `levels`, then commits
    /// `new`. An `Undefined` old state is a discard and accepted from any
    /// state.
    pub fn advance(&mut self, levels: Range<u32>, old: ImageState, new: ImageState) -> VkResult<()> {
        if old != ImageState::Undefined {
            for l in levels.clone() {
                let actual = self.levels[l as usize];
                if actual != old {
                    return Err(VkError::LayoutMismatch {
                        image: self.name,
                        expected: old,
                        actual,
                    });
                }
            }
        }
        for l in levels {
            self.levels[l as usize] = new;
        }
        Ok(())
    }

    fn range(&self, levels: &Range<u32>) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: levels.start,
            level_count: levels.end - levels.start,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Records a synchronization2 barrier for `img` after validating its state.
pub unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: &mut TrackedImage,
    t: Transition,
) -> VkResult<()> {
    let levels = img.all_levels();
    img.advance(levels.clone(), t.old, t.new)?;

    let barrier = vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: t.src_stage,
        src_access_mask: t.src_access,
        dst_stage_mask: t.dst_stage,
        dst_access_mask: t.dst_access,
        old_layout: t.old.layout(),
        new_layout: t.new.layout(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: img.image,
        subresource_range: img.range(&levels),
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: &barrier,
        ..Default::default()
    };
    device.cmd_pipeline_barrier2(cmd, &dep);
    Ok(())
}

/// Legacy barrier masks used for texture uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The only two texture transitions the upload path performs.
pub fn texture_barrier_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> VkResult<LegacyBarrier> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(LegacyBarrier {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LegacyBarrier {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(VkError::UnsupportedTransition { old, new }),
    }
}

unsafe fn legacy_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: &mut TrackedImage,
    levels: Range<u32>,
    old: ImageState,
    new: ImageState,
    masks: LegacyBarrier,
) -> VkResult<()> {
    img.advance(levels.clone(), old, new)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: masks.src_access,
        dst_access_mask: masks.dst_access,
        old_layout: old.layout(),
        new_layout: new.layout(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: img.image,
        subresource_range: img.range(&levels),
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

/// Texture transition over every mip level, legacy barrier.
pub unsafe fn transition_texture(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: &mut TrackedImage,
    old: ImageState,
    new: ImageState,
) -> VkResult<()> {
    let masks = texture_barrier_masks(old.layout(), new.layout())?;
    let levels = img.all_levels();
    legacy_barrier(device, cmd, img, levels, old, new, masks)
}

/// `floor(log2(max(w, h))) + 1`
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipOp {
    Barrier {
        level: u32,
        old: ImageState,
        new: ImageState,
    },
    Blit {
        src_level: u32,
        src: (u32, u32),
        dst: (u32, u32),
    },
}

/// Ordered barrier/blit sequence that fills levels `1..levels` from level 0
/// and leaves the whole chain shader-readable.
pub fn mip_chain(width: u32, height: u32, levels: u32) -> Vec<MipOp> {
    let mut ops = Vec::with_capacity(levels as usize * 3);
    for i in 1..levels {
        ops.push(MipOp::Barrier {
            level: i - 1,
            old: ImageState::TransferDst,
            new: ImageState::TransferSrc,
        });
        ops.push(MipOp::Blit {
            src_level: i - 1,
            src: mip_extent(width, height, i - 1),
            dst: mip_extent(width, height, i),
        });
        ops.push(MipOp::Barrier {
            level: i - 1,
            old: ImageState::TransferSrc,
            new: ImageState::ShaderReadOnly,
        });
    }
    ops.push(MipOp::Barrier {
        level: levels.max(1) - 1,
        old: ImageState::TransferDst,
        new: ImageState::ShaderReadOnly,
    });
    ops
}

fn mip_barrier_masks(old: ImageState, new: ImageState) -> VkResult<LegacyBarrier> {
    match (old, new) {
        (ImageState::TransferDst, ImageState::TransferSrc) => Ok(LegacyBarrier {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (ImageState::TransferSrc, ImageState::ShaderReadOnly) => Ok(LegacyBarrier {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => texture_barrier_masks(old.layout(), new.layout()),
    }
}

pub fn check_blit_support(format: vk::Format, props: &vk::FormatProperties) -> VkResult<()> {
    if props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        Ok(())
    } else {
        Err(VkError::BlitUnsupported(format))
    }
}

/// Fills the mip chain of `img` by successive linear blits. Every level must
/// be in `TransferDst` on entry; every level is `ShaderReadOnly` on exit.
pub unsafe fn generate_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    img: &mut TrackedImage,
    width: u32,
    height: u32,
) -> VkResult<()> {
    let offset = |(w, h): (u32, u32)| [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: w as i32,
            y: h as i32,
            z: 1,
        },
    ];
    let layers = |mip_level| vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    };

    for op in mip_chain(width, height, img.mip_levels()) {
        match op {
            MipOp::Barrier { level, old, new } => {
                let masks = mip_barrier_masks(old, new)?;
                legacy_barrier(device, cmd, img, level..level + 1, old, new, masks)?;
            }
            MipOp::Blit {
                src_level,
                src,
                dst,
            } => {
                let blit = vk::ImageBlit {
                    src_subresource: layers(src_level),
                    src_offsets: offset(src),
                    dst_subresource: layers(src_level + 1),
                    dst_offsets: offset(dst),
                };
                device.cmd_blit_image(
                    cmd,
                    img.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    img.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }
        }
    }
    Ok(())
}
