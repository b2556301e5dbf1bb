// SPDX-License-Identifier: CEPL-1.0
//! Per-image command buffers and fences, the shared semaphore pair, and the
//! acquire / record / submit / present cycle.
//!
//! One frame is in flight per swapchain image, gated by that image's fence.
//! The acquire-complete and render-complete semaphores are shared by every
//! image, so this is a single-frame-in-flight protocol: pipelining more
//! frames needs a semaphore pair per frame slot.

use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, trace};

use crate::device::DeviceContext;
use crate::error::{GpuError, GpuResult, VkResultExt};
use crate::teardown::Release;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Records draw commands into an already-open render pass.
///
/// Implementations must not begin or end the render pass, submit, or
/// present. `D` is whatever records commands; for the real backend it is the
/// logical device.
///
/// `prepare` runs once after the render pass exists, before the first frame;
/// build pipelines and buffers there. `cleanup` runs once at shutdown after
/// the device is idle and before the render pass is destroyed.
pub trait DrawCommands<D = ash::Device> {
    fn prepare(&mut self, _device: &D, _render_pass: vk::RenderPass, _extent: vk::Extent2D) {}

    fn record(&mut self, device: &D, cmd: vk::CommandBuffer, frame: FrameInfo);

    fn cleanup(&mut self, _device: &D) {}
}

impl<D, F> DrawCommands<D> for F
where
    F: FnMut(&D, vk::CommandBuffer, FrameInfo),
{
    fn record(&mut self, device: &D, cmd: vk::CommandBuffer, frame: FrameInfo) {
        self(device, cmd, frame)
    }
}

/// Draws nothing; the frame is just the render pass clears.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearOnly;

impl<D> DrawCommands<D> for ClearOnly {
    fn record(&mut self, _device: &D, _cmd: vk::CommandBuffer, _frame: FrameInfo) {}
}

pub struct PassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: [vk::ClearValue; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

/// GPU operations one frame cycle is made of.
pub trait FrameBackend {
    type Recorder;

    fn recorder(&self) -> &Self::Recorder;
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> GpuResult<u32>;
    fn wait_for_fence(&mut self, fence: vk::Fence) -> GpuResult<()>;
    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> GpuResult<()>;
    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, pass: &PassBegin);
    fn end_render_pass(&mut self, cmd: vk::CommandBuffer);
    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> GpuResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> GpuResult<()>;
    fn submit(&mut self, submission: &Submission) -> GpuResult<()>;
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> GpuResult<()>;
}

pub struct AshFrameBackend<'a> {
    device: &'a ash::Device,
    swapchain_loader: &'a swapchain::Device,
    swapchain: vk::SwapchainKHR,
    queue: vk::Queue,
}

impl<'a> AshFrameBackend<'a> {
    pub(crate) fn new(ctx: &'a DeviceContext, swapchain: vk::SwapchainKHR) -> Self {
        Self {
            device: &ctx.device,
            swapchain_loader: &ctx.swapchain_loader,
            swapchain,
            queue: ctx.queue,
        }
    }
}

impl FrameBackend for AshFrameBackend<'_> {
    type Recorder = ash::Device;

    fn recorder(&self) -> &ash::Device {
        self.device
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> GpuResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        }
        .during("vkAcquireNextImageKHR")?;
        if suboptimal {
            trace!("acquired suboptimal image {index}");
        }
        Ok(index)
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> GpuResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.during("vkWaitForFences")
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        let begin = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(cmd, &begin) }.during("vkBeginCommandBuffer")
    }

    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, pass: &PassBegin) {
        let begin = vk::RenderPassBeginInfo {
            render_pass: pass.render_pass,
            framebuffer: pass.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            },
            clear_value_count: pass.clear_values.len() as u32,
            p_clear_values: pass.clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE)
        };
    }

    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.during("vkEndCommandBuffer")
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> GpuResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.during("vkResetFences")
    }

    fn submit(&mut self, s: &Submission) -> GpuResult<()> {
        let wait_stages = [s.wait_stage];
        let info = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&info), s.fence)
        }
        .during("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> GpuResult<()> {
        let info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let suboptimal = unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
            .during("vkQueuePresentKHR")?;
        if suboptimal {
            trace!("presented to a suboptimal swapchain");
        }
        Ok(())
    }
}

/// Pool whose buffers reset implicitly on begin.
pub fn command_pool_info(queue_family: u32) -> vk::CommandPoolCreateInfo<'static> {
    vk::CommandPoolCreateInfo::default()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family)
}

pub fn command_buffer_allocate_info(
    pool: vk::CommandPool,
    count: u32,
) -> vk::CommandBufferAllocateInfo<'static> {
    vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count)
}

/// Signaled, so the first wait on each image's fence returns at once.
pub fn fence_info() -> vk::FenceCreateInfo<'static> {
    vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED)
}

/// Render targets a frame draws into.
#[derive(Clone, Copy)]
pub struct FrameTargets<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
}

pub struct FrameExecutor {
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    pub(crate) fences: Vec<vk::Fence>,
    pub(crate) acquire_complete: vk::Semaphore,
    pub(crate) render_complete: vk::Semaphore,

    clear_color: [f32; 4],
    current_image: u32,
    state: FrameState,
}

impl Default for FrameExecutor {
    fn default() -> Self {
        Self {
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            fences: Vec::new(),
            acquire_complete: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            current_image: 0,
            state: FrameState::Idle,
        }
    }
}

impl FrameExecutor {
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ]
    }

    /// Image index of the most recent acquire.
    pub fn current_image(&self) -> u32 {
        self.current_image
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    pub fn fences(&self) -> &[vk::Fence] {
        &self.fences
    }

    pub fn semaphores(&self) -> [vk::Semaphore; 2] {
        [self.acquire_complete, self.render_complete]
    }

    /// Command buffers, fences and framebuffers must each cover every image.
    pub fn check_cardinality(&self, images: usize, framebuffers: usize) -> GpuResult<()> {
        let command_buffers = self.command_buffers.len();
        let fences = self.fences.len();
        if command_buffers == images && fences == images && framebuffers == images {
            Ok(())
        } else {
            Err(GpuError::ImageCountMismatch {
                images,
                command_buffers,
                fences,
                framebuffers,
            })
        }
    }

    pub(crate) fn create_command_pool(&mut self, ctx: &DeviceContext) -> GpuResult<()> {
        let info = command_pool_info(ctx.queue_family);
        self.command_pool = unsafe { ctx.device.create_command_pool(&info, None) }
            .during("vkCreateCommandPool")?;
        Ok(())
    }

    pub(crate) fn allocate_command_buffers(
        &mut self,
        ctx: &DeviceContext,
        image_count: usize,
    ) -> GpuResult<()> {
        let info = command_buffer_allocate_info(self.command_pool, image_count as u32);
        self.command_buffers = unsafe { ctx.device.allocate_command_buffers(&info) }
            .during("vkAllocateCommandBuffers")?;
        Ok(())
    }

    /// One fence per image.
    pub(crate) fn create_fences(&mut self, ctx: &DeviceContext, image_count: usize) -> GpuResult<()> {
        let info = fence_info();
        self.fences.reserve(image_count);
        for _ in 0..image_count {
            let fence = unsafe { ctx.device.create_fence(&info, None) }.during("vkCreateFence")?;
            self.fences.push(fence);
        }
        Ok(())
    }

    pub(crate) fn create_semaphores(&mut self, ctx: &DeviceContext) -> GpuResult<()> {
        let info = vk::SemaphoreCreateInfo::default();
        self.acquire_complete =
            unsafe { ctx.device.create_semaphore(&info, None) }.during("vkCreateSemaphore")?;
        self.render_complete =
            unsafe { ctx.device.create_semaphore(&info, None) }.during("vkCreateSemaphore")?;
        debug!(
            "frame executor ready: {} command buffers, {} fences",
            self.command_buffers.len(),
            self.fences.len()
        );
        Ok(())
    }

    /// Runs one acquire / record / submit / present cycle and returns the
    /// image index that was presented.
    pub fn render_frame<B, D>(
        &mut self,
        backend: &mut B,
        targets: FrameTargets<'_>,
        draw: &mut D,
    ) -> GpuResult<u32>
    where
        B: FrameBackend,
        D: DrawCommands<B::Recorder> + ?Sized,
    {
        let count = self.command_buffers.len();
        self.check_cardinality(count, targets.framebuffers.len())?;
        self.state = FrameState::Idle;

        let image_index = backend.acquire_next_image(self.acquire_complete)?;
        let slot = image_index as usize;
        if slot >= count {
            return Err(GpuError::ImageIndexOutOfRange {
                index: image_index,
                count,
            });
        }
        self.current_image = image_index;
        let cmd = self.command_buffers[slot];
        let fence = self.fences[slot];

        // The previous submission on this image must drain before reuse.
        backend.wait_for_fence(fence)?;
        self.transition(FrameState::Acquired);

        backend.begin_commands(cmd)?;
        self.transition(FrameState::Recording);
        let pass = PassBegin {
            render_pass: targets.render_pass,
            framebuffer: targets.framebuffers[slot],
            extent: targets.extent,
            clear_values: self.clear_values(),
        };
        backend.begin_render_pass(cmd, &pass);
        draw.record(
            backend.recorder(),
            cmd,
            FrameInfo {
                image_index,
                extent: targets.extent,
            },
        );
        backend.end_render_pass(cmd);
        backend.end_commands(cmd)?;

        backend.reset_fence(fence)?;
        backend.submit(&Submission {
            command_buffer: cmd,
            wait: self.acquire_complete,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: self.render_complete,
            fence,
        })?;
        self.transition(FrameState::Submitted);

        backend.present(image_index, self.render_complete)?;
        self.transition(FrameState::Presented);
        self.transition(FrameState::Idle);
        Ok(image_index)
    }

    fn transition(&mut self, next: FrameState) {
        trace!(image = self.current_image, from = ?self.state, to = ?next, "frame");
        self.state = next;
    }

    pub(crate) unsafe fn destroy_semaphores<R: Release>(&mut self, r: &mut R) {
        for sem in [&mut self.acquire_complete, &mut self.render_complete] {
            if *sem != vk::Semaphore::null() {
                unsafe { r.destroy_semaphore(*sem) };
                *sem = vk::Semaphore::null();
            }
        }
    }

    pub(crate) unsafe fn destroy_fences<R: Release>(&mut self, r: &mut R) {
        for fence in self.fences.drain(..) {
            unsafe { r.destroy_fence(fence) };
        }
    }

    pub(crate) unsafe fn free_command_buffers<R: Release>(&mut self, r: &mut R) {
        if !self.command_buffers.is_empty() {
            unsafe { r.free_command_buffers(self.command_pool, &self.command_buffers) };
            self.command_buffers.clear();
        }
    }

    pub(crate) unsafe fn destroy_command_pool<R: Release>(&mut self, r: &mut R) {
        if self.command_pool != vk::CommandPool::null() {
            unsafe { r.destroy_command_pool(self.command_pool) };
            self.command_pool = vk::CommandPool::null();
        }
    }
}
