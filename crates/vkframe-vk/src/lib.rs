// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan session for one window: instance and device bring-up, a FIFO
//! swapchain with a depth buffer, and a blocking per-frame present loop.

mod debug;
mod device;
mod error;
mod frame;
mod ledger;
mod session;
mod swapchain;
mod targets;
mod teardown;

pub use ash;

pub use device::{
    find_memory_type_index, search_graphics_queue_index, validation_layer_name, ExtensionPolicy,
};
pub use error::{GpuError, GpuResult};
pub use frame::{
    command_buffer_allocate_info, command_pool_info, fence_info, ClearOnly, DrawCommands,
    FrameBackend, FrameExecutor, FrameInfo, FrameState, FrameTargets, PassBegin, Submission,
};
pub use ledger::{Ledger, Stage};
pub use session::{Session, SessionConfig};
pub use swapchain::{select_surface_format, SwapchainPlan, UNDEFINED_EXTENT};
pub use targets::{attachment_descriptions, framebuffer_info, DEPTH_FORMAT};
