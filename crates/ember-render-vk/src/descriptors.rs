// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::DeviceContext;
use crate::error::VkResult;

/// Binding 0: per-frame uniform block (vertex). Binding 1: texture (fragment).
pub unsafe fn create_set_layout(device: &ash::Device) -> VkResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

/// Set layout, pool and one set per frame slot.
pub struct FrameDescriptors {
    device: ash::Device,
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl FrameDescriptors {
    pub unsafe fn new(device: &ash::Device, count: usize) -> VkResult<Self> {
        let layout = create_set_layout(device)?;
        let mut out = Self {
            device: device.clone(),
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };

        let n = count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: n,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: n,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: n,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        out.pool = device.create_descriptor_pool(&pool_ci, None)?;

        let layouts = vec![layout; count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: out.pool,
            descriptor_set_count: n,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        out.sets = device.allocate_descriptor_sets(&alloc)?;
        Ok(out)
    }

    /// Points set `i` at `uniforms[i]` and the shared texture.
    pub unsafe fn write(
        &self,
        uniforms: &[(vk::Buffer, vk::DeviceSize)],
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = uniforms
            .iter()
            .map(|&(buffer, range)| vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            })
            .collect();
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };

        let mut writes = Vec::with_capacity(self.sets.len() * 2);
        for (set, info) in self.sets.iter().zip(&buffer_infos) {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: *set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: *set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &image_info,
                ..Default::default()
            });
        }
        self.device.update_descriptor_sets(&writes, &[]);
    }
}

impl Drop for FrameDescriptors {
    fn drop(&mut self) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                // sets go with the pool
                self.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

pub struct TextureSampler {
    device: ash::Device,
    pub sampler: vk::Sampler,
}

impl TextureSampler {
    /// Linear filtering, repeat addressing, anisotropy at the device limit,
    /// LOD range covering `mip_levels`.
    pub unsafe fn new(ctx: &DeviceContext, mip_levels: u32) -> VkResult<Self> {
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            anisotropy_enable: vk::TRUE,
            max_anisotropy: ctx.max_anisotropy(),
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: mip_levels as f32,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };
        Ok(Self {
            device: ctx.device.clone(),
            sampler: ctx.device.create_sampler(&ci, None)?,
        })
    }
}

impl Drop for TextureSampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}
