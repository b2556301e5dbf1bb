// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{GpuResult, VkResultExt};
use crate::teardown::Release;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const IDENTITY: vk::ComponentMapping = vk::ComponentMapping {
    r: vk::ComponentSwizzle::R,
    g: vk::ComponentSwizzle::G,
    b: vk::ComponentSwizzle::B,
    a: vk::ComponentSwizzle::A,
};

/// Color attachment 0 ends presentable, depth attachment 1 ends
/// depth-attachment-optimal. Both are cleared on load and stored.
pub fn attachment_descriptions(color_format: vk::Format) -> [vk::AttachmentDescription; 2] {
    let color = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: DEPTH_FORMAT,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..color
    };
    [color, depth]
}

fn view_info(
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo {
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: IDENTITY,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

/// Framebuffer over `attachments` (color view, then the shared depth view).
pub fn framebuffer_info<'a>(
    render_pass: vk::RenderPass,
    attachments: &'a [vk::ImageView],
    extent: vk::Extent2D,
) -> vk::FramebufferCreateInfo<'a> {
    vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1)
}

/// Depth buffer, per-image color views, the render pass and one framebuffer
/// per swapchain image.
#[derive(Default)]
pub struct RenderTargets {
    pub(crate) depth_image: vk::Image,
    pub(crate) depth_memory: vk::DeviceMemory,
    pub(crate) depth_view: vk::ImageView,
    pub(crate) color_views: Vec<vk::ImageView>,
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTargets {
    pub(crate) fn create_depth_buffer(
        &mut self,
        ctx: &DeviceContext,
        extent: vk::Extent2D,
    ) -> GpuResult<()> {
        let d = &ctx.device;
        let info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format: DEPTH_FORMAT,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        self.depth_image = unsafe { d.create_image(&info, None) }.during("vkCreateImage")?;

        let reqs = unsafe { d.get_image_memory_requirements(self.depth_image) };
        let memory_type_index =
            ctx.memory_type_index(reqs.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc = vk::MemoryAllocateInfo {
            allocation_size: reqs.size,
            memory_type_index,
            ..Default::default()
        };
        self.depth_memory =
            unsafe { d.allocate_memory(&alloc, None) }.during("vkAllocateMemory")?;
        unsafe { d.bind_image_memory(self.depth_image, self.depth_memory, 0) }
            .during("vkBindImageMemory")?;

        debug!(
            "depth buffer {}x{} in memory type {memory_type_index} ({} bytes)",
            extent.width, extent.height, reqs.size
        );
        Ok(())
    }

    pub(crate) fn create_views(
        &mut self,
        ctx: &DeviceContext,
        images: &[vk::Image],
        color_format: vk::Format,
    ) -> GpuResult<()> {
        let d = &ctx.device;
        self.color_views.reserve(images.len());
        for &image in images {
            let info = view_info(image, color_format, vk::ImageAspectFlags::COLOR);
            let view = unsafe { d.create_image_view(&info, None) }.during("vkCreateImageView")?;
            self.color_views.push(view);
        }

        let info = view_info(self.depth_image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH);
        self.depth_view = unsafe { d.create_image_view(&info, None) }.during("vkCreateImageView")?;
        debug!("{} color views + depth view", self.color_views.len());
        Ok(())
    }

    // No explicit subpass dependencies; the implicit external ones apply.
    pub(crate) fn create_render_pass(
        &mut self,
        ctx: &DeviceContext,
        color_format: vk::Format,
    ) -> GpuResult<()> {
        let attachments = attachment_descriptions(color_format);
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };

        let info = vk::RenderPassCreateInfo {
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            ..Default::default()
        };
        self.render_pass =
            unsafe { ctx.device.create_render_pass(&info, None) }.during("vkCreateRenderPass")?;
        Ok(())
    }

    pub(crate) fn create_framebuffers(
        &mut self,
        ctx: &DeviceContext,
        extent: vk::Extent2D,
    ) -> GpuResult<()> {
        self.framebuffers.reserve(self.color_views.len());
        for &view in &self.color_views {
            let attachments = [view, self.depth_view];
            let info = framebuffer_info(self.render_pass, &attachments, extent);
            let fb = unsafe { ctx.device.create_framebuffer(&info, None) }
                .during("vkCreateFramebuffer")?;
            self.framebuffers.push(fb);
        }
        debug!("{} framebuffers", self.framebuffers.len());
        Ok(())
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub(crate) unsafe fn destroy_framebuffers<R: Release>(&mut self, r: &mut R) {
        for fb in self.framebuffers.drain(..) {
            unsafe { r.destroy_framebuffer(fb) };
        }
    }

    pub(crate) unsafe fn destroy_render_pass<R: Release>(&mut self, r: &mut R) {
        if self.render_pass != vk::RenderPass::null() {
            unsafe { r.destroy_render_pass(self.render_pass) };
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub(crate) unsafe fn destroy_views<R: Release>(&mut self, r: &mut R) {
        for view in self.color_views.drain(..) {
            unsafe { r.destroy_image_view(view) };
        }
        if self.depth_view != vk::ImageView::null() {
            unsafe { r.destroy_image_view(self.depth_view) };
            self.depth_view = vk::ImageView::null();
        }
    }

    pub(crate) unsafe fn destroy_depth_buffer<R: Release>(&mut self, r: &mut R) {
        if self.depth_image != vk::Image::null() {
            unsafe { r.destroy_image(self.depth_image) };
            self.depth_image = vk::Image::null();
        }
        if self.depth_memory != vk::DeviceMemory::null() {
            unsafe { r.free_memory(self.depth_memory) };
            self.depth_memory = vk::DeviceMemory::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_attachment_clears_stores_and_presents() {
        let [color, _] = attachment_descriptions(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_attachment_ends_attachment_optimal() {
        let [_, depth] = attachment_descriptions(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(depth.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn views_are_single_layer_identity_swizzled() {
        let info = view_info(vk::Image::null(), DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH);
        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.components.r, vk::ComponentSwizzle::R);
        assert_eq!(info.components.a, vk::ComponentSwizzle::A);
        assert_eq!(info.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(info.subresource_range.level_count, 1);
        assert_eq!(info.subresource_range.layer_count, 1);
    }

    #[test]
    fn framebuffer_spans_the_extent_with_color_then_depth() {
        use ash::vk::Handle;
        let attachments = [vk::ImageView::from_raw(7), vk::ImageView::from_raw(9)];
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let info = framebuffer_info(vk::RenderPass::from_raw(3), &attachments, extent);
        assert_eq!(info.render_pass, vk::RenderPass::from_raw(3));
        assert_eq!(info.attachment_count, 2);
        assert_eq!(info.p_attachments, attachments.as_ptr());
        assert_eq!((info.width, info.height, info.layers), (640, 480, 1));
    }

    #[test]
    fn empty_targets_hold_no_handles() {
        let t = RenderTargets::default();
        assert_eq!(t.render_pass(), vk::RenderPass::null());
        assert!(t.framebuffers().is_empty());
        assert_eq!(t.depth_view, vk::ImageView::null());
    }
}
