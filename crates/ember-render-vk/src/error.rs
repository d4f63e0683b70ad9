// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::sync::SlotState;
use crate::transition::ImageState;

/// Engine-level failures. Stale swapchains never show up here; they are
/// handled inside the frame loop.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no suitable GPU found:\n{}", .rejected.join("\n"))]
    NoSuitableDevice { rejected: Vec<String> },

    #[error("device has no graphics-capable queue family")]
    NoGraphicsQueue,

    #[error("no queue family can present to this surface")]
    NoPresentQueue,

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("unsupported texture layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("image `{image}` is in {actual:?}, barrier expected {expected:?}")]
    LayoutMismatch {
        image: &'static str,
        expected: ImageState,
        actual: ImageState,
    },

    #[error("format {0:?} does not support linear blitting")]
    BlitUnsupported(vk::Format),

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("no supported depth format")]
    NoDepthFormat,

    #[error("fence wait exceeded {0} ms")]
    FenceTimeout(u64),

    #[error("frame slot {slot} is {state:?}, cannot {op}")]
    SlotOrder {
        slot: usize,
        state: SlotState,
        op: &'static str,
    },

    #[error("instance extension {0} not available")]
    MissingInstanceExtension(String),

    #[error("layer {0} not available")]
    MissingLayer(String),

    #[error("vulkan: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("failed to load {0}")]
    Loading(String),
}

pub type VkResult<T> = std::result::Result<T, VkError>;
