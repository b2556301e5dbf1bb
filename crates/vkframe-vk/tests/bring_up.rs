// SPDX-License-Identifier: CEPL-1.0
use vkframe_render::RenderSize;
use vkframe_vk::ash::vk;
use vkframe_vk::ash::vk::Handle;
use vkframe_vk::{
    attachment_descriptions, command_buffer_allocate_info, command_pool_info,
    fence_info, find_memory_type_index, framebuffer_info, select_surface_format, FrameExecutor,
    GpuError, Ledger, Stage, SwapchainPlan, DEPTH_FORMAT, UNDEFINED_EXTENT,
};

fn undefined_surface(min_image_count: u32) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count,
        max_image_count: 0,
        current_extent: vk::Extent2D {
            width: UNDEFINED_EXTENT,
            height: UNDEFINED_EXTENT,
        },
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        ..Default::default()
    }
}

#[test]
fn window_640x480_with_single_image_minimum() {
    let plan = SwapchainPlan::negotiate(&undefined_surface(1), RenderSize::new(640, 480));
    assert_eq!(plan.extent.width, 640);
    assert_eq!(plan.extent.height, 480);
    assert_eq!(plan.image_count, 2);
    assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);

    let formats = [vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }];
    let chosen = select_surface_format(&formats, vk::Format::B8G8R8A8_UNORM).unwrap();
    let [color, depth] = attachment_descriptions(chosen.format);
    assert_eq!(color.format, vk::Format::B8G8R8A8_UNORM);
    assert_eq!(depth.format, DEPTH_FORMAT);

    // One command buffer, one signaled fence and one framebuffer per image.
    let alloc = command_buffer_allocate_info(vk::CommandPool::from_raw(1), plan.image_count);
    assert_eq!(alloc.command_buffer_count, 2);
    assert_eq!(alloc.level, vk::CommandBufferLevel::PRIMARY);
    assert_eq!(fence_info().flags, vk::FenceCreateFlags::SIGNALED);
    assert_eq!(
        command_pool_info(0).flags,
        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
    );

    let views: Vec<[vk::ImageView; 2]> = (0..plan.image_count as u64)
        .map(|i| [vk::ImageView::from_raw(0x10 + i), vk::ImageView::from_raw(0x99)])
        .collect();
    for attachments in &views {
        let fb = framebuffer_info(vk::RenderPass::from_raw(5), attachments, plan.extent);
        assert_eq!(fb.attachment_count, 2);
        assert_eq!((fb.width, fb.height, fb.layers), (640, 480, 1));
    }
    assert_eq!(views.len(), plan.image_count as usize);
    assert_eq!(FrameExecutor::default().semaphores().len(), 2);
}

#[test]
fn unbuilt_executor_does_not_cover_the_images() {
    let exec = FrameExecutor::default();
    assert!(exec.command_buffers().is_empty());
    assert_eq!(exec.semaphores(), [vk::Semaphore::null(); 2]);
    let err = exec.check_cardinality(2, 2).unwrap_err();
    assert!(matches!(
        err,
        GpuError::ImageCountMismatch {
            images: 2,
            command_buffers: 0,
            fences: 0,
            framebuffers: 2,
        }
    ));
    assert!(exec.check_cardinality(0, 0).is_ok());
}

#[test]
fn depth_memory_prefers_the_lowest_device_local_type() {
    let mut props = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 3,
        ..Default::default()
    };
    props.memory_types[0].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    props.memory_types[1].property_flags =
        vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
    props.memory_types[2].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

    let idx = find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    assert_eq!(idx, Some(1));
    let idx = find_memory_type_index(&props, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    assert_eq!(idx, None);
}

#[test]
fn full_session_tears_down_in_reverse() {
    let mut ledger = Ledger::default();
    for stage in Stage::CREATION_ORDER {
        ledger.enter(stage).unwrap();
    }
    let teardown: Vec<Stage> = ledger.drain_reverse().collect();
    assert_eq!(teardown.first(), Some(&Stage::Semaphores));
    assert_eq!(teardown.last(), Some(&Stage::Instance));

    let position = |s: Stage| teardown.iter().position(|&t| t == s).unwrap();
    assert!(position(Stage::Swapchain) < position(Stage::Surface));
    assert!(position(Stage::Surface) < position(Stage::CommandPool));
    assert!(position(Stage::CommandPool) < position(Stage::Device));
    assert!(position(Stage::Device) < position(Stage::Instance));
    assert!(ledger.entered().is_empty());
}

#[test]
fn release_build_ledger_skips_debug_report() {
    let mut ledger = Ledger::default();
    for stage in Stage::CREATION_ORDER
        .into_iter()
        .filter(|&s| s != Stage::DebugReport)
    {
        ledger.enter(stage).unwrap();
    }
    assert!(!ledger.contains(Stage::DebugReport));
    assert_eq!(ledger.entered().len(), 12);
}
