// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

/// Frame slots (fence + command buffer + descriptor set) cycled by the loop.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MODEL_PATH: &str = "models/test_skull.obj";
pub const DEFAULT_TEXTURE_PATH: &str = "textures/test_skull.jpg";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    /// Low-latency vsync; falls back to FIFO.
    #[default]
    Mailbox,
    /// Strict vsync.
    Fifo,
}

/// Knobs the host hands to the engine at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub app_name: String,
    pub present: PresentPreference,
    pub fence_timeout: Duration,
    pub model_path: PathBuf,
    pub texture_path: PathBuf,
    pub pipeline_cache: bool,
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Ember".into(),
            present: PresentPreference::default(),
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
            model_path: DEFAULT_MODEL_PATH.into(),
            texture_path: DEFAULT_TEXTURE_PATH.into(),
            pipeline_cache: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn fence_timeout_ms(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_build_constants() {
        let c = EngineConfig::default();
        assert_eq!(c.present, PresentPreference::Mailbox);
        assert_eq!(c.fence_timeout_ns(), 1_000_000_000);
        assert_eq!(c.fence_timeout_ms(), 1000);
        assert!(c.model_path.ends_with("test_skull.obj"));
        assert_eq!(c.validation, cfg!(debug_assertions));
    }

    #[test]
    fn huge_timeout_saturates() {
        let c = EngineConfig {
            fence_timeout: Duration::MAX,
            ..Default::default()
        };
        assert_eq!(c.fence_timeout_ns(), u64::MAX);
    }
}
