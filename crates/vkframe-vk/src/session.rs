// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::info;
use vkframe_render::HostWindow;

use crate::device::{DeviceContext, ExtensionPolicy};
use crate::error::{GpuResult, VkResultExt};
use crate::frame::{AshFrameBackend, DrawCommands, FrameState, FrameTargets};
use crate::ledger::{Ledger, Stage};
use crate::swapchain::Surface;
use crate::teardown::{tear_down, AshRelease, SessionObjects};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub app_name: String,
    pub preferred_format: vk::Format,
    pub clear_color: [f32; 4],
    pub extensions: ExtensionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: "SimpleTriangle".to_owned(),
            preferred_format: vk::Format::B8G8R8A8_UNORM,
            clear_color: [0.5, 0.25, 0.25, 0.0],
            extensions: ExtensionPolicy::All,
        }
    }
}

/// Everything needed to put frames on one window: device context, surface,
/// swapchain, render targets, the frame executor and the draw producer.
///
/// Objects are created in [`Stage::CREATION_ORDER`] and released in exact
/// reverse once the device is idle, whether construction finished or not.
pub struct Session {
    ctx: DeviceContext,
    objects: SessionObjects,
    ledger: Ledger,
    producer: Box<dyn DrawCommands>,
    prepared: bool,
}

impl Session {
    pub fn new(
        window: &dyn HostWindow,
        config: &SessionConfig,
        producer: Box<dyn DrawCommands>,
    ) -> GpuResult<Self> {
        let display = window.display_handle()?.as_raw();
        let ctx = DeviceContext::initialize(&config.app_name, display, config.extensions)?;

        let mut session = Session {
            ctx,
            objects: SessionObjects::default(),
            ledger: Ledger::default(),
            producer,
            prepared: false,
        };
        for stage in session.ctx.stages() {
            session.ledger.enter(stage)?;
        }
        session.build(window, config)?;
        Ok(session)
    }

    fn build(&mut self, window: &dyn HostWindow, config: &SessionConfig) -> GpuResult<()> {
        let ctx = &self.ctx;
        let o = &mut self.objects;

        self.ledger.enter(Stage::CommandPool)?;
        o.frames.create_command_pool(ctx)?;

        self.ledger.enter(Stage::Surface)?;
        o.surface = Surface::create(ctx, window)?;
        o.surface.configure(ctx, config.preferred_format)?;

        self.ledger.enter(Stage::Swapchain)?;
        o.swapchain.create(ctx, &o.surface, window)?;
        let extent = o.swapchain.extent();
        let color_format = o.surface.format().format;
        let image_count = o.swapchain.image_count();

        self.ledger.enter(Stage::DepthBuffer)?;
        o.targets.create_depth_buffer(ctx, extent)?;

        self.ledger.enter(Stage::ImageViews)?;
        o.targets
            .create_views(ctx, &o.swapchain.images, color_format)?;

        self.ledger.enter(Stage::RenderPass)?;
        o.targets.create_render_pass(ctx, color_format)?;

        self.ledger.enter(Stage::Framebuffers)?;
        o.targets.create_framebuffers(ctx, extent)?;

        self.ledger.enter(Stage::CommandBuffers)?;
        o.frames.allocate_command_buffers(ctx, image_count)?;

        self.ledger.enter(Stage::Fences)?;
        o.frames.create_fences(ctx, image_count)?;

        self.ledger.enter(Stage::Semaphores)?;
        o.frames.create_semaphores(ctx)?;

        o.frames.set_clear_color(config.clear_color);
        o.frames
            .check_cardinality(image_count, o.targets.framebuffers().len())?;

        self.producer
            .prepare(&ctx.device, o.targets.render_pass(), extent);
        self.prepared = true;

        info!(
            "session ready ({}x{}, {} images)",
            extent.width, extent.height, image_count
        );
        Ok(())
    }

    /// Acquires, records, submits and presents one frame. Blocks until an
    /// image is available and its previous submission has drained.
    pub fn render_frame(&mut self) -> GpuResult<u32> {
        let o = &mut self.objects;
        let mut backend = AshFrameBackend::new(&self.ctx, o.swapchain.handle);
        let targets = FrameTargets {
            render_pass: o.targets.render_pass(),
            framebuffers: o.targets.framebuffers(),
            extent: o.swapchain.extent(),
        };
        o.frames
            .render_frame(&mut backend, targets, self.producer.as_mut())
    }

    /// Blocks until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.ctx.device.device_wait_idle() }.during("vkDeviceWaitIdle")
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.objects.frames.set_clear_color(rgba);
    }

    pub fn device(&self) -> &ash::Device {
        self.ctx.device()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.objects.swapchain.extent()
    }

    pub fn image_count(&self) -> usize {
        self.objects.swapchain.image_count()
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.objects.surface.format()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.objects.targets.render_pass()
    }

    /// Image index of the most recent acquire.
    pub fn current_image_index(&self) -> u32 {
        self.objects.frames.current_image()
    }

    pub fn frame_state(&self) -> FrameState {
        self.objects.frames.state()
    }

    pub fn stages(&self) -> &[Stage] {
        self.ledger.entered()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let producer = if self.prepared {
            Some(self.producer.as_mut())
        } else {
            None
        };
        let mut release = AshRelease::new(&mut self.ctx);
        unsafe { tear_down(&mut release, &mut self.objects, &mut self.ledger, producer) };
        info!("session torn down");
    }
}
