// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};
use crate::transition::{
    check_blit_support, generate_mipmaps, mip_levels, transition_texture, ImageState, TrackedImage,
};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> VkResult<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(VkError::NoMemoryType { type_bits, flags })
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> VkResult<vk::DeviceMemory> {
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: find_memory_type(&ctx.memory_props, req.memory_type_bits, flags)?,
        ..Default::default()
    };
    Ok(ctx.device.allocate_memory(&mai, None)?)
}

pub struct GpuBuffer {
    device: ash::Device,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> VkResult<Self> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = ctx.device.create_buffer(&bci, None)?;
        let mut out = Self {
            device: ctx.device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };
        let req = ctx.device.get_buffer_memory_requirements(buffer);
        out.memory = allocate(ctx, req, flags)?;
        ctx.device.bind_buffer_memory(buffer, out.memory, 0)?;
        Ok(out)
    }

    unsafe fn staging(ctx: &DeviceContext, data: &[u8]) -> VkResult<Self> {
        let buf = Self::new(
            ctx,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let ptr = ctx
            .device
            .map_memory(buf.memory, 0, buf.size, vk::MemoryMapFlags::empty())?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
        ctx.device.unmap_memory(buf.memory);
        Ok(buf)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Device-local 2D image with its memory, a full-chain view and tracked
/// layout state.
pub struct GpuImage {
    device: ash::Device,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub desc: ImageDesc,
    pub tracked: TrackedImage,
}

impl GpuImage {
    pub unsafe fn new(ctx: &DeviceContext, name: &'static str, desc: ImageDesc) -> VkResult<Self> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = ctx.device.create_image(&ci, None)?;
        let mut out = Self {
            device: ctx.device.clone(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            desc,
            tracked: TrackedImage::new(name, image, desc.aspect, desc.mip_levels),
        };
        let req = ctx.device.get_image_memory_requirements(image);
        out.memory = allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        ctx.device.bind_image_memory(image, out.memory, 0)?;
        out.view = crate::swapchain::create_view(
            &ctx.device,
            image,
            desc.format,
            desc.aspect,
            desc.mip_levels,
        )?;
        Ok(out)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.tracked.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Records `f` into a throwaway command buffer, submits it and blocks until
/// the queue is idle. Startup loads only.
pub unsafe fn one_shot<F>(ctx: &DeviceContext, pool: vk::CommandPool, f: F) -> VkResult<()>
where
    F: FnOnce(vk::CommandBuffer) -> VkResult<()>,
{
    let d = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = d.allocate_command_buffers(&ai)?[0];

    let run = || -> VkResult<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &bi)?;
        f(cmd)?;
        d.end_command_buffer(cmd)?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        d.queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())?;
        d.queue_wait_idle(ctx.graphics_queue)?;
        Ok(())
    };
    let res = run();
    d.free_command_buffers(pool, std::slice::from_ref(&cmd));
    res
}

/// Host data -> staging -> device-local buffer with `usage | TRANSFER_DST`.
pub unsafe fn upload_buffer(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = data.len() as vk::DeviceSize;
    let staging = GpuBuffer::staging(ctx, data).context("staging buffer")?;
    let dst = GpuBuffer::new(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .context("device-local buffer")?;

    one_shot(ctx, pool, |cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        ctx.device
            .cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
        Ok(())
    })
    .context("buffer copy")?;

    debug!("uploaded {} bytes ({:?})", size, usage);
    Ok(dst)
}

/// Uploads RGBA8 pixels as an sRGB texture with a full blit-generated mip
/// chain, left in `ShaderReadOnly`.
pub unsafe fn upload_texture(
    instance: &ash::Instance,
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    rgba: &[u8],
    width: u32,
    height: u32,
) -> Result<GpuImage> {
    let props = instance.get_physical_device_format_properties(ctx.phys, TEXTURE_FORMAT);
    check_blit_support(TEXTURE_FORMAT, &props)?;

    let levels = mip_levels(width, height);
    let staging = GpuBuffer::staging(ctx, rgba).context("texture staging")?;
    let mut tex = GpuImage::new(
        ctx,
        "texture",
        ImageDesc {
            width,
            height,
            mip_levels: levels,
            samples: vk::SampleCountFlags::TYPE_1,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        },
    )
    .context("texture image")?;

    one_shot(ctx, pool, |cmd| {
        transition_texture(
            &ctx.device,
            cmd,
            &mut tex.tracked,
            ImageState::Undefined,
            ImageState::TransferDst,
        )?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        ctx.device.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            tex.tracked.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        generate_mipmaps(&ctx.device, cmd, &mut tex.tracked, width, height)
    })
    .context("texture upload")?;

    debug!("texture {}x{} with {} mip levels", width, height, levels);
    Ok(tex)
}

/// Host-visible, coherent buffer mapped for its whole lifetime.
pub struct MappedUniform {
    buffer: GpuBuffer,
    ptr: *mut u8,
}

impl MappedUniform {
    pub unsafe fn new(ctx: &DeviceContext, size: usize) -> VkResult<Self> {
        let buffer = GpuBuffer::new(
            ctx,
            size as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let ptr = ctx
            .device
            .map_memory(buffer.memory, 0, buffer.size, vk::MemoryMapFlags::empty())?
            as *mut u8;
        Ok(Self { buffer, ptr })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    /// Caller guarantees the GPU is not reading this buffer (its frame
    /// slot's fence has been waited on).
    pub fn write(&mut self, bytes: &[u8]) {
        let n = uniform_copy_len(bytes.len(), self.buffer.size);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, n) };
    }
}

/// Uniform writes replace the whole block. A size mismatch is a layout bug;
/// release builds still never write past the mapping.
fn uniform_copy_len(len: usize, size: vk::DeviceSize) -> usize {
    debug_assert_eq!(
        len as vk::DeviceSize,
        size,
        "uniform write of {len} bytes into a {size}-byte block"
    );
    len.min(size as usize)
}

impl Drop for MappedUniform {
    fn drop(&mut self) {
        unsafe { self.buffer.device.unmap_memory(self.buffer.memory) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, f) in types.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: *f,
                heap_index: 0,
            };
        }
        p
    }

    #[test]
    fn picks_first_matching_allowed_type() {
        use vk::MemoryPropertyFlags as M;
        let p = props(&[
            M::DEVICE_LOCAL,
            M::HOST_VISIBLE,
            M::HOST_VISIBLE | M::HOST_COHERENT,
            M::DEVICE_LOCAL | M::HOST_VISIBLE | M::HOST_COHERENT,
        ]);
        let want = M::HOST_VISIBLE | M::HOST_COHERENT;
        assert_eq!(find_memory_type(&p, 0b1111, want).unwrap(), 2);
        // type 2 masked out by the resource's requirements
        assert_eq!(find_memory_type(&p, 0b1011, want).unwrap(), 3);
        assert_eq!(find_memory_type(&p, 0b1111, M::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn no_match_is_an_error() {
        use vk::MemoryPropertyFlags as M;
        let p = props(&[M::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(&p, 0b1, M::HOST_VISIBLE),
            Err(VkError::NoMemoryType { type_bits: 1, .. })
        ));
        // bits beyond memory_type_count are ignored
        assert!(find_memory_type(&p, 0b10, M::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn uniform_write_covers_the_block() {
        assert_eq!(uniform_copy_len(192, 192), 192);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore = "checked in debug builds only")]
    #[should_panic(expected = "uniform write of 256 bytes into a 192-byte block")]
    fn oversized_uniform_write_panics_in_debug() {
        uniform_copy_len(256, 192);
    }
}
