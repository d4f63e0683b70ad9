// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use ember_render_vk::config::{
    DEFAULT_FENCE_TIMEOUT, DEFAULT_HEIGHT, DEFAULT_MODEL_PATH, DEFAULT_TEXTURE_PATH, DEFAULT_WIDTH,
};
use ember_render_vk::{EngineConfig, PresentPreference};

pub const DEFAULT_CONFIG_PATH: &str = "ember.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: "ember".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RenderCfg {
    pub present: PresentCfg,
    pub fence_timeout_ms: u64,
    pub pipeline_cache: bool,
    /// Force FIFO while the window is unfocused.
    pub vsync_when_unfocused: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            present: PresentCfg::default(),
            fence_timeout_ms: DEFAULT_FENCE_TIMEOUT.as_millis() as u64,
            pipeline_cache: true,
            vsync_when_unfocused: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AssetsCfg {
    pub model: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_PATH.into(),
            texture: DEFAULT_TEXTURE_PATH.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub assets: AssetsCfg,
}

impl AppCfg {
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse config")
    }

    /// A missing file means defaults; a malformed one is reported and ignored.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match Self::parse(&s) {
                Ok(cfg) => {
                    info!("config: {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("{}: {e:#}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            app_name: self.window.title.clone(),
            present: match self.render.present {
                PresentCfg::Fifo => PresentPreference::Fifo,
                PresentCfg::Mailbox => PresentPreference::Mailbox,
            },
            fence_timeout: Duration::from_millis(self.render.fence_timeout_ms),
            model_path: self.assets.model.clone(),
            texture_path: self.assets.texture.clone(),
            pipeline_cache: self.render.pipeline_cache,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!((cfg.window.width, cfg.window.height), (1280, 720));
        let e = cfg.engine();
        assert_eq!(e.present, PresentPreference::Mailbox);
        assert_eq!(e.fence_timeout, DEFAULT_FENCE_TIMEOUT);
        assert!(e.pipeline_cache);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            title = "skull"

            [render]
            present = "fifo"
            fence_timeout_ms = 250

            [assets]
            model = "m/a.obj"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.title, "skull");
        let e = cfg.engine();
        assert_eq!(e.app_name, "skull");
        assert_eq!(e.present, PresentPreference::Fifo);
        assert_eq!(e.fence_timeout_ms(), 250);
        assert_eq!(e.model_path, PathBuf::from("m/a.obj"));
        assert_eq!(e.texture_path, PathBuf::from(DEFAULT_TEXTURE_PATH));
    }

    #[test]
    fn unknown_present_mode_is_an_error() {
        assert!(AppCfg::parse("[render]\npresent = \"immediate\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = AppCfg::load(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
