// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use tracing::{debug, info, warn};

use crate::assets::Vertex;
use crate::error::VkError;

const VS_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const FS_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

pub const MIN_SAMPLE_SHADING: f32 = 0.2;

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    b.iter().fold(String::with_capacity(b.len() * 2), |mut s, x| {
        let _ = write!(&mut s, "{x:02x}");
        s
    })
}

/// Cache file name keyed on vendor, device, driver and cache UUID, so a
/// driver update never feeds stale blobs back in.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

/// Pipeline cache, optionally seeded from and flushed back to disk.
pub struct PipelineCache {
    device: ash::Device,
    pub handle: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    pub unsafe fn new(device: &ash::Device, path: Option<PathBuf>) -> Result<Self> {
        let data = path.as_deref().and_then(|p| fs::read(p).ok());
        if let (Some(p), Some(d)) = (&path, &data) {
            debug!("pipeline cache: {} bytes from {}", d.len(), p.display());
        }
        let initial: &[u8] = data.as_deref().unwrap_or(&[]);
        let ci = vk::PipelineCacheCreateInfo::default().initial_data(initial);
        let handle = match device.create_pipeline_cache(&ci, None) {
            Ok(h) => h,
            // a corrupt blob is not worth failing startup over
            Err(e) if !initial.is_empty() => {
                warn!("pipeline cache rejected ({e:?}); starting empty");
                device
                    .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
                    .map_err(VkError::from)
                    .context("create_pipeline_cache")?
            }
            Err(e) => return Err(VkError::from(e)).context("create_pipeline_cache"),
        };
        Ok(Self {
            device: device.clone(),
            handle,
            path,
        })
    }

    unsafe fn save(&self, path: &Path) -> Result<()> {
        let bytes = self
            .device
            .get_pipeline_cache_data(self.handle)
            .map_err(VkError::from)?;
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
        debug!("pipeline cache: {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            if let Some(p) = &self.path {
                if let Err(e) = self.save(p) {
                    warn!("pipeline cache not saved: {e:#}");
                }
            }
            self.device.destroy_pipeline_cache(self.handle, None);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub sample_shading: bool,
}

struct ShaderModule<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    unsafe fn new(device: &'a ash::Device, spv: &[u8]) -> Result<Self> {
        let code = read_spv(&mut Cursor::new(spv))
            .map_err(|e| VkError::Loading(format!("spir-v: {e}")))?;
        let ci = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = device
            .create_shader_module(&ci, None)
            .map_err(VkError::from)
            .context("create_shader_module")?;
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

/// The single mesh pipeline and its layout. Built for dynamic rendering
/// against one color format; rebuild when that format changes.
pub struct MeshPipeline {
    device: ash::Device,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub desc: PipelineDesc,
}

impl MeshPipeline {
    // STRICT: color_attachment_formats MUST match the swapchain image format.
    pub unsafe fn new(
        device: &ash::Device,
        cache: vk::PipelineCache,
        set_layout: vk::DescriptorSetLayout,
        desc: PipelineDesc,
    ) -> Result<Self> {
        let vs = ShaderModule::new(device, VS_SPV)?;
        let fs = ShaderModule::new(device, FS_SPV)?;
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let vb = Vertex::binding();
        let va = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: desc.samples,
            sample_shading_enable: if desc.sample_shading { vk::TRUE } else { vk::FALSE },
            min_sample_shading: MIN_SAMPLE_SHADING,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(VkError::from)
            .context("create_pipeline_layout")?;

        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &desc.color_format,
            depth_attachment_format: desc.depth_format,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next: (&rendering as *const vk::PipelineRenderingCreateInfo).cast(),
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            ..Default::default()
        };

        let pipeline = match device.create_graphics_pipelines(
            cache,
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p[0],
            Err((_, err)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(VkError::from(err)).context("create_graphics_pipelines");
            }
        };

        info!(
            "pipeline: color {:?} depth {:?} samples {:?} sample shading {}",
            desc.color_format, desc.depth_format, desc.samples, desc.sample_shading
        );
        Ok(Self {
            device: device.clone(),
            layout,
            pipeline,
            desc,
        })
    }
}

impl Drop for MeshPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_encodes_device_identity() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x0123_4567,
            ..Default::default()
        };
        props.pipeline_cache_uuid[0] = 0xab;
        props.pipeline_cache_uuid[15] = 0x01;
        let p = pipeline_cache_path(&props);
        let name = p.to_str().unwrap();
        assert!(name.starts_with("vk_pipeline_cache_10de_2684_01234567_ab"));
        assert!(name.ends_with("01.bin"));
        // 16 uuid bytes -> 32 hex chars
        let uuid = name
            .trim_start_matches("vk_pipeline_cache_10de_2684_01234567_")
            .trim_end_matches(".bin");
        assert_eq!(uuid.len(), 32);
    }

    #[test]
    fn embedded_shaders_are_spirv() {
        for spv in [VS_SPV, FS_SPV] {
            let words = read_spv(&mut Cursor::new(spv)).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }
}
