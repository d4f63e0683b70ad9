// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame execution engine: device negotiation, swapchain lifecycle,
//! tracked layout transitions, frames in flight, staging uploads and the
//! per-frame command recording, composed by [`VkRenderer`].

pub mod assets;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod negotiate;
pub mod pipeline;
pub mod recorder;
pub mod renderer;
pub mod swapchain;
pub mod sync;
pub mod targets;
pub mod transition;
pub mod upload;

pub use config::{EngineConfig, PresentPreference, MAX_FRAMES_IN_FLIGHT};
pub use error::{VkError, VkResult};
pub use renderer::VkRenderer;
