// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};
use vkframe_render::{HostWindow, RenderSize};

use crate::device::DeviceContext;
use crate::error::{GpuError, GpuResult, VkResultExt};
use crate::teardown::Release;

/// Sentinel a surface reports when the application picks the extent.
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

/// Last surface format whose color format equals `preferred`.
pub fn select_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::Format,
) -> Option<vk::SurfaceFormatKHR> {
    formats.iter().rev().find(|f| f.format == preferred).copied()
}

/// Swapchain parameters derived from surface capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `client_size` is only consulted when the surface leaves the extent
    /// undefined.
    pub fn negotiate(caps: &vk::SurfaceCapabilitiesKHR, client_size: RenderSize) -> Self {
        let extent = if caps.current_extent.width == UNDEFINED_EXTENT {
            vk::Extent2D {
                width: client_size.width,
                height: client_size.height,
            }
        } else {
            caps.current_extent
        };

        Self {
            image_count: caps.min_image_count.max(2),
            extent,
            present_mode: vk::PresentModeKHR::FIFO,
            pre_transform: caps.current_transform,
        }
    }
}

/// Window surface plus the color format chosen for it.
#[derive(Default)]
pub struct Surface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) format: vk::SurfaceFormatKHR,
}

impl Surface {
    pub(crate) fn create(ctx: &DeviceContext, window: &dyn HostWindow) -> GpuResult<Self> {
        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        let handle = unsafe { ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None) }
            .during("vkCreateSurfaceKHR")?;
        debug!("surface created");
        Ok(Self {
            handle,
            format: vk::SurfaceFormatKHR::default(),
        })
    }

    /// Picks the color format and checks the graphics queue can present.
    pub(crate) fn configure(&mut self, ctx: &DeviceContext, preferred: vk::Format) -> GpuResult<()> {
        let loader = &ctx.surface_loader;
        let formats = unsafe { loader.get_physical_device_surface_formats(ctx.phys, self.handle) }
            .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        self.format = select_surface_format(&formats, preferred)
            .ok_or(GpuError::SurfaceFormatUnavailable(preferred))?;

        let supported = unsafe {
            loader.get_physical_device_surface_support(ctx.phys, ctx.queue_family, self.handle)
        }
        .during("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        if !supported {
            return Err(GpuError::PresentUnsupported {
                family: ctx.queue_family,
            });
        }
        Ok(())
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub(crate) unsafe fn destroy<R: Release>(&mut self, r: &mut R) {
        if self.handle != vk::SurfaceKHR::null() {
            unsafe { r.destroy_surface(self.handle) };
            self.handle = vk::SurfaceKHR::null();
            debug!("surface destroyed");
        }
    }
}

#[derive(Default)]
pub struct Swapchain {
    pub(crate) handle: vk::SwapchainKHR,
    pub(crate) extent: vk::Extent2D,
    pub(crate) images: Vec<vk::Image>,
}

impl Swapchain {
    /// Fills `self` as handles are created so a failure halfway is still
    /// released by [`Swapchain::destroy`].
    pub(crate) fn create(
        &mut self,
        ctx: &DeviceContext,
        surface: &Surface,
        window: &dyn HostWindow,
    ) -> GpuResult<()> {
        let caps = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.phys, surface.handle)
        }
        .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let plan = SwapchainPlan::negotiate(&caps, window.client_size());

        let info = vk::SwapchainCreateInfoKHR {
            surface: surface.handle,
            min_image_count: plan.image_count,
            image_format: surface.format.format,
            image_color_space: surface.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        self.handle = unsafe { ctx.swapchain_loader.create_swapchain(&info, None) }
            .during("vkCreateSwapchainKHR")?;
        self.extent = plan.extent;
        self.images = unsafe { ctx.swapchain_loader.get_swapchain_images(self.handle) }
            .during("vkGetSwapchainImagesKHR")?;

        info!(
            "swapchain ready ({}x{}, {} images, fmt 0x{:x})",
            plan.extent.width,
            plan.extent.height,
            self.images.len(),
            surface.format.format.as_raw()
        );
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub(crate) unsafe fn destroy<R: Release>(&mut self, r: &mut R) {
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { r.destroy_swapchain(self.handle) };
            self.handle = vk::SwapchainKHR::null();
            debug!("swapchain destroyed");
        }
    }
}
