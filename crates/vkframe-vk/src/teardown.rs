// SPDX-License-Identifier: CEPL-1.0
//! Shutdown: wait for the device to go idle, let the draw producer drop its
//! own objects, then release every entered stage newest first.

use ash::vk;
use tracing::{debug, warn};

use crate::device::DeviceContext;
use crate::error::{GpuResult, VkResultExt};
use crate::frame::{DrawCommands, FrameExecutor};
use crate::ledger::{Ledger, Stage};
use crate::swapchain::{Surface, Swapchain};
use crate::targets::RenderTargets;

/// Device calls that free session objects.
///
/// Every `destroy_*` requires the handle to be live and no longer in use by
/// the GPU.
pub(crate) trait Release {
    type Recorder;

    fn recorder(&self) -> &Self::Recorder;
    fn wait_idle(&mut self) -> GpuResult<()>;

    unsafe fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    unsafe fn destroy_fence(&mut self, fence: vk::Fence);
    unsafe fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    unsafe fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);
    unsafe fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    unsafe fn destroy_image_view(&mut self, view: vk::ImageView);
    unsafe fn destroy_image(&mut self, image: vk::Image);
    unsafe fn free_memory(&mut self, memory: vk::DeviceMemory);
    unsafe fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    unsafe fn destroy_surface(&mut self, surface: vk::SurfaceKHR);
    unsafe fn destroy_device(&mut self);
    unsafe fn unregister_debug_report(&mut self);
    unsafe fn destroy_instance(&mut self);
}

pub(crate) struct AshRelease<'a> {
    ctx: &'a mut DeviceContext,
}

impl<'a> AshRelease<'a> {
    pub(crate) fn new(ctx: &'a mut DeviceContext) -> Self {
        Self { ctx }
    }
}

impl Release for AshRelease<'_> {
    type Recorder = ash::Device;

    fn recorder(&self) -> &ash::Device {
        &self.ctx.device
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        unsafe { self.ctx.device.device_wait_idle() }.during("vkDeviceWaitIdle")
    }

    unsafe fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.ctx.device.destroy_semaphore(semaphore, None) };
    }

    unsafe fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.ctx.device.destroy_fence(fence, None) };
    }

    unsafe fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.ctx.device.free_command_buffers(pool, buffers) };
    }

    unsafe fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        unsafe { self.ctx.device.destroy_command_pool(pool, None) };
    }

    unsafe fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.ctx.device.destroy_framebuffer(framebuffer, None) };
    }

    unsafe fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        unsafe { self.ctx.device.destroy_render_pass(render_pass, None) };
    }

    unsafe fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.ctx.device.destroy_image_view(view, None) };
    }

    unsafe fn destroy_image(&mut self, image: vk::Image) {
        unsafe { self.ctx.device.destroy_image(image, None) };
    }

    unsafe fn free_memory(&mut self, memory: vk::DeviceMemory) {
        unsafe { self.ctx.device.free_memory(memory, None) };
    }

    unsafe fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.ctx.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    unsafe fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        unsafe { self.ctx.surface_loader.destroy_surface(surface, None) };
    }

    unsafe fn destroy_device(&mut self) {
        unsafe { self.ctx.destroy_device() };
    }

    unsafe fn unregister_debug_report(&mut self) {
        unsafe { self.ctx.unregister_debug_report() };
    }

    unsafe fn destroy_instance(&mut self) {
        unsafe { self.ctx.destroy_instance() };
    }
}

/// The per-window objects a session creates on top of its device context.
#[derive(Default)]
pub(crate) struct SessionObjects {
    pub(crate) surface: Surface,
    pub(crate) swapchain: Swapchain,
    pub(crate) targets: RenderTargets,
    pub(crate) frames: FrameExecutor,
}

impl SessionObjects {
    /// Frees whatever `stage` created. Null handles are skipped, so a stage
    /// that failed halfway or was already released costs nothing.
    pub(crate) unsafe fn release<R: Release>(&mut self, stage: Stage, r: &mut R) {
        debug!(?stage, "releasing stage");
        unsafe {
            match stage {
                Stage::Semaphores => self.frames.destroy_semaphores(r),
                Stage::Fences => self.frames.destroy_fences(r),
                Stage::CommandBuffers => self.frames.free_command_buffers(r),
                Stage::Framebuffers => self.targets.destroy_framebuffers(r),
                Stage::RenderPass => self.targets.destroy_render_pass(r),
                Stage::ImageViews => self.targets.destroy_views(r),
                Stage::DepthBuffer => self.targets.destroy_depth_buffer(r),
                Stage::Swapchain => self.swapchain.destroy(r),
                Stage::Surface => self.surface.destroy(r),
                Stage::CommandPool => self.frames.destroy_command_pool(r),
                Stage::Device => r.destroy_device(),
                Stage::DebugReport => r.unregister_debug_report(),
                Stage::Instance => r.destroy_instance(),
            }
        }
    }
}

/// `producer` is `Some` only if it was prepared; it is cleaned up after the
/// device is idle and before any stage is released.
pub(crate) unsafe fn tear_down<R, D>(
    r: &mut R,
    objects: &mut SessionObjects,
    ledger: &mut Ledger,
    producer: Option<&mut D>,
) where
    R: Release,
    D: DrawCommands<R::Recorder> + ?Sized,
{
    if ledger.contains(Stage::Device) {
        if let Err(e) = r.wait_idle() {
            warn!("device_wait_idle failed during shutdown: {e}");
        }
        if let Some(producer) = producer {
            producer.cleanup(r.recorder());
        }
    }
    let stages: Vec<Stage> = ledger.drain_reverse().collect();
    for stage in stages {
        unsafe { objects.release(stage, r) };
    }
}
