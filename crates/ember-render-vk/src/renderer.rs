// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use ember_core::FrameClock;
use ember_math::UniformFrameData;
use ember_render::{FrameStatus, RenderSize, Renderer};

use crate::assets::{load_mesh_or_fallback, load_texture_or_fallback};
use crate::config::{EngineConfig, PresentPreference, MAX_FRAMES_IN_FLIGHT};
use crate::descriptors::{FrameDescriptors, TextureSampler};
use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};
use crate::instance::InstanceContext;
use crate::pipeline::{pipeline_cache_path, MeshPipeline, PipelineCache, PipelineDesc};
use crate::recorder::{record_frame, DrawInputs, PresentTarget};
use crate::swapchain::Swapchain;
use crate::sync::{
    AcquireStep, FenceWait, FrameAction, FrameLoop, FrameSlots, SemaphoreSlot, SemaphoreSlots,
    SwapchainStatus,
};
use crate::targets::{choose_depth_format, RenderTargets};
use crate::transition::TrackedImage;
use crate::upload::{upload_buffer, upload_texture, GpuBuffer, GpuImage, MappedUniform};

fn track_swapchain_images(sc: &Swapchain) -> Vec<TrackedImage> {
    sc.images
        .iter()
        .map(|&img| TrackedImage::new("swapchain", img, vk::ImageAspectFlags::COLOR, 1))
        .collect()
}

/// Frame execution engine. Field order is teardown order: per-frame sync
/// first, the device and instance last.
pub struct VkRenderer {
    cfg: EngineConfig,
    clock: FrameClock,
    size: RenderSize,
    resize_pending: bool,
    pending_recreate: bool,
    frame_loop: FrameLoop,
    swap_images: Vec<TrackedImage>,
    index_count: u32,
    depth_format: vk::Format,

    semaphores: SemaphoreSlots,
    frames: FrameSlots,
    pipeline: MeshPipeline,
    pipeline_cache: PipelineCache,
    descriptors: FrameDescriptors,
    uniforms: Vec<MappedUniform>,
    _sampler: TextureSampler,
    _texture: GpuImage,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    targets: RenderTargets,
    swapchain: Swapchain,
    device: DeviceContext,
    instance: InstanceContext,
}

impl VkRenderer {
    // STRICT ORDER (init):
    // 1) instance + surface, device + queues
    // 2) swapchain, depth format, render targets
    // 3) frame slots (pool) before any upload, semaphores per image
    // 4) mesh + texture uploads, sampler, uniforms, descriptor sets
    // 5) pipeline cache, pipeline
    // A failure at any step drops what was built so far in reverse.
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: EngineConfig,
    ) -> Result<Self> {
        unsafe {
            let instance = InstanceContext::new(&cfg.app_name, cfg.validation, window, display)?;
            let device = DeviceContext::new(&instance)?;
            let d = &device.device;

            let swapchain = Swapchain::create(
                &instance.instance,
                &instance.surface_loader,
                instance.surface,
                &device,
                (size.width, size.height),
                cfg.present,
                None,
            )
            .context("initial swapchain")?;

            let depth_format = choose_depth_format(|f| {
                instance
                    .instance
                    .get_physical_device_format_properties(device.phys, f)
            })?;
            let targets =
                RenderTargets::new(&device, swapchain.extent, swapchain.format, depth_format)
                    .context("render targets")?;

            let fence_wait = FenceWait::new(cfg.fence_timeout_ns(), cfg.fence_timeout_ms());
            let mut frames =
                FrameSlots::new(d, device.families.graphics, MAX_FRAMES_IN_FLIGHT, fence_wait)?;
            let semaphores = SemaphoreSlots::new(d, swapchain.image_count())?;

            let mesh = load_mesh_or_fallback(&cfg.model_path);
            let vertex_buffer = upload_buffer(
                &device,
                frames.pool(),
                mesh.vertex_bytes(),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )
            .context("vertex buffer")?;
            let index_buffer = upload_buffer(
                &device,
                frames.pool(),
                mesh.index_bytes(),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )
            .context("index buffer")?;
            let index_count = mesh.indices.len() as u32;

            let pixels = load_texture_or_fallback(&cfg.texture_path);
            let texture = upload_texture(
                &instance.instance,
                &device,
                frames.pool(),
                &pixels.rgba,
                pixels.width,
                pixels.height,
            )?;
            let sampler = TextureSampler::new(&device, texture.desc.mip_levels)?;

            let uniforms = (0..MAX_FRAMES_IN_FLIGHT)
                .map(|_| MappedUniform::new(&device, UniformFrameData::SIZE))
                .collect::<VkResult<Vec<_>>>()
                .context("uniform buffers")?;
            let descriptors = FrameDescriptors::new(d, MAX_FRAMES_IN_FLIGHT)?;
            let ubo_ranges: Vec<_> = uniforms.iter().map(|u| (u.buffer(), u.size())).collect();
            descriptors.write(&ubo_ranges, texture.view, sampler.sampler);
            for (slot, &set) in frames.slots.iter_mut().zip(&descriptors.sets) {
                slot.desc_set = set;
            }

            let cache_path = cfg
                .pipeline_cache
                .then(|| pipeline_cache_path(&device.props));
            let pipeline_cache = PipelineCache::new(d, cache_path)?;
            let pipeline = MeshPipeline::new(
                d,
                pipeline_cache.handle,
                descriptors.layout,
                PipelineDesc {
                    color_format: swapchain.format,
                    depth_format,
                    samples: device.msaa_samples,
                    sample_shading: device.sample_rate_shading,
                },
            )?;

            let swap_images = track_swapchain_images(&swapchain);
            let frame_loop = FrameLoop::new(MAX_FRAMES_IN_FLIGHT, swapchain.image_count());
            info!(
                "vk: ready ({} vertices, {} indices, {} frames in flight, {} images)",
                mesh.vertices.len(),
                index_count,
                MAX_FRAMES_IN_FLIGHT,
                swapchain.image_count()
            );

            Ok(Self {
                cfg,
                clock: FrameClock::start(),
                size,
                resize_pending: false,
                pending_recreate: false,
                frame_loop,
                swap_images,
                index_count,
                depth_format,
                semaphores,
                frames,
                pipeline,
                pipeline_cache,
                descriptors,
                uniforms,
                _sampler: sampler,
                _texture: texture,
                index_buffer,
                vertex_buffer,
                targets,
                swapchain,
                device,
                instance,
            })
        }
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn swapchain_view_count(&self) -> usize {
        self.swapchain.views.len()
    }

    pub fn semaphore_slot_count(&self) -> usize {
        self.semaphores.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_loop.frame()
    }

    pub fn semaphore_index(&self) -> usize {
        self.frame_loop.semaphore()
    }

    pub fn slots_in_flight(&self) -> usize {
        self.frame_loop.busy()
    }

    /// Rebuilds the swapchain now, as a stale-swapchain report would.
    pub fn force_recreate(&mut self) -> Result<FrameStatus> {
        unsafe { self.recreate() }
    }

    fn surface_extent_is_zero(&self) -> VkResult<bool> {
        let caps = unsafe {
            self.instance
                .surface_loader
                .get_physical_device_surface_capabilities(self.device.phys, self.instance.surface)?
        };
        Ok(caps.current_extent.width == 0 || caps.current_extent.height == 0)
    }

    // STRICT ORDER (recreate):
    // 1) device idle: nothing may still use the old swapchain
    // 2) zero-sized framebuffer: defer, keep the old swapchain
    // 3) new swapchain chained to the old one; old views die with it
    // 4) render targets at the new extent
    // 5) semaphore slots sized to the new image count, index back to 0
    // 6) fresh command buffers
    // 7) pipeline only if the color format changed
    // 8) re-track the new images
    unsafe fn recreate(&mut self) -> Result<FrameStatus> {
        self.device.wait_idle();

        if self.size.is_zero() || self.surface_extent_is_zero()? {
            if !self.pending_recreate {
                debug!("vk: framebuffer is zero-sized, recreate deferred");
            }
            self.pending_recreate = true;
            return Ok(FrameStatus::Skipped);
        }

        let swapchain = Swapchain::create(
            &self.instance.instance,
            &self.instance.surface_loader,
            self.instance.surface,
            &self.device,
            (self.size.width, self.size.height),
            self.cfg.present,
            Some(&self.swapchain),
        )
        .context("recreate swapchain")?;
        let old_format = self.swapchain.format;
        self.swapchain = swapchain;

        self.targets = RenderTargets::new(
            &self.device,
            self.swapchain.extent,
            self.swapchain.format,
            self.depth_format,
        )
        .context("render targets")?;

        let images = self.swapchain.image_count();
        self.semaphores = SemaphoreSlots::new(&self.device.device, images)?;

        self.frames.reallocate_command_buffers()?;
        self.frame_loop.swapchain_rebuilt(images);

        if old_format != self.swapchain.format {
            info!(
                "vk: swapchain format {:?} -> {:?}, rebuilding pipeline",
                old_format, self.swapchain.format
            );
            self.pipeline = MeshPipeline::new(
                &self.device.device,
                self.pipeline_cache.handle,
                self.descriptors.layout,
                PipelineDesc {
                    color_format: self.swapchain.format,
                    ..self.pipeline.desc
                },
            )?;
        }

        self.swap_images = track_swapchain_images(&self.swapchain);
        self.resize_pending = false;
        self.pending_recreate = false;

        info!(
            "vk: swapchain recreated {}x{} ({} images)",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            images
        );
        Ok(FrameStatus::Recreated)
    }

    // STRICT ORDER (frame):
    // 1) wait slot fence
    // 2) acquire (stale -> recreate, slot untouched)
    // 3) reset fence + cmd, write uniforms, record
    // 4) submit: wait acquire @ color output, signal render-complete + fence
    // 5) present, advance both counters
    // A failure in 3 or 4 hands the slot back with a signaled fence.
    unsafe fn draw_frame(&mut self) -> Result<FrameStatus> {
        let f = self.frame_loop.frame();
        let sem = self.semaphores.slots[self.frame_loop.semaphore()];

        self.frames
            .wait(f)
            .context("wait_for_fences(frame slot)")?;
        self.frame_loop.fence_signaled()?;

        let acquired = self.swapchain.loader().acquire_next_image(
            self.swapchain.handle,
            u64::MAX,
            sem.acquire,
            vk::Fence::null(),
        );
        let status = SwapchainStatus::classify(acquired.map(|(_, suboptimal)| suboptimal))
            .context("acquire_next_image")?;
        let step = self.frame_loop.acquired(status, self.resize_pending)?;
        let image_index = match (step, acquired) {
            (AcquireStep::Recreate, _) => {
                debug!("vk: acquire reported {:?}", status);
                return self.recreate();
            }
            (AcquireStep::Record { .. }, Ok((i, _))) => i,
            (AcquireStep::Record { .. }, Err(e)) => {
                self.frame_loop.abandoned()?;
                return Err(VkError::from(e)).context("acquire_next_image");
            }
        };

        if let Err(e) = self.record_and_submit(f, image_index, sem) {
            if let Err(r) = self.frames.restore(f) {
                warn!("vk: frame slot {f} fence not restored: {r}");
            }
            self.frame_loop.abandoned()?;
            return Err(e);
        }
        self.frame_loop.submitted()?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sem.render_complete,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented = self
            .swapchain
            .loader()
            .queue_present(self.device.present_queue, &present);
        let status = SwapchainStatus::classify(presented).context("queue_present")?;

        if self.frame_loop.presented(status, self.resize_pending) == FrameAction::Recreate {
            debug!("vk: present reported {:?} (resize pending: {})", status, self.resize_pending);
            return self.recreate();
        }
        Ok(FrameStatus::Presented)
    }

    /// Steps 3 and 4. On error the slot fence may be unsignaled with nothing
    /// queued to signal it.
    unsafe fn record_and_submit(
        &mut self,
        f: usize,
        image_index: u32,
        sem: SemaphoreSlot,
    ) -> Result<()> {
        self.frames.reset(f)?;
        let slot = self.frames.slots[f];
        let img = image_index as usize;

        let extent = self.swapchain.extent;
        let ubo = UniformFrameData::animate(self.clock.elapsed_secs(), extent.width, extent.height);
        self.uniforms[f].write(ubo.as_bytes());

        let draw = DrawInputs {
            vertex_buffer: self.vertex_buffer.buffer,
            index_buffer: self.index_buffer.buffer,
            index_count: self.index_count,
            desc_set: slot.desc_set,
            extent,
        };
        let present_target = PresentTarget {
            image: &mut self.swap_images[img],
            view: self.swapchain.views[img],
        };
        record_frame(
            &self.device.device,
            slot.cmd,
            present_target,
            &mut self.targets,
            &self.pipeline,
            &draw,
        )
        .context("record frame")?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sem.acquire,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &slot.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sem.render_complete,
            ..Default::default()
        };
        self.device
            .device
            .queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit),
                slot.fence,
            )
            .map_err(VkError::from)
            .context("queue_submit")?;
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_config(window, display, size, EngineConfig::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size != self.size {
            self.size = size;
            self.resize_pending = true;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_zero() {
            return Ok(FrameStatus::Skipped);
        }
        unsafe {
            if self.pending_recreate {
                return self.recreate();
            }
            self.draw_frame()
        }
    }

    fn set_vsync(&mut self, on: bool) {
        let want = if on {
            PresentPreference::Fifo
        } else {
            PresentPreference::Mailbox
        };
        if want != self.cfg.present {
            info!("vk: present preference -> {:?}", want);
            self.cfg.present = want;
            self.pending_recreate = true;
        }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        // Fields drop in declaration order after this; the GPU must be done
        // with every one of them first.
        unsafe {
            if let Err(e) = self.frames.wait_all() {
                warn!("vk: teardown: {e}");
            }
            self.device.wait_idle();
        }
        debug!("vk: renderer teardown");
    }
}
