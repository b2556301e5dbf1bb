// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::ledger::Stage;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{op} failed: {result}")]
    Call {
        op: &'static str,
        result: vk::Result,
    },

    #[error("no physical device available")]
    NoPhysicalDevice,

    #[error("no queue family with graphics support")]
    NoGraphicsQueue,

    #[error("queue family {family} cannot present to the surface")]
    PresentUnsupported { family: u32 },

    #[error("surface does not offer format {0:?}")]
    SurfaceFormatUnavailable(vk::Format),

    #[error("no memory type in bits {type_bits:#034b} with {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error(
        "per-image resources out of step: {images} images, {command_buffers} command buffers, \
         {fences} fences, {framebuffers} framebuffers"
    )]
    ImageCountMismatch {
        images: usize,
        command_buffers: usize,
        fences: usize,
        framebuffers: usize,
    },

    #[error("acquired image {index} but only {count} images exist")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("{stage:?} entered before {missing:?}")]
    OutOfOrder { stage: Stage, missing: Stage },

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("invalid application name: {0}")]
    InvalidName(#[from] std::ffi::NulError),
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Names the failing call when a raw `VkResult` is lifted into [`GpuError`].
pub(crate) trait VkResultExt<T> {
    fn during(self, op: &'static str) -> GpuResult<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn during(self, op: &'static str) -> GpuResult<T> {
        self.map_err(|result| GpuError::Call { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn during_names_the_call() {
        let r: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        match r.during("vkQueueSubmit") {
            Err(GpuError::Call { op, result }) => {
                assert_eq!(op, "vkQueueSubmit");
                assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn success_passes_through() {
        let r: ash::prelude::VkResult<u32> = Ok(7);
        assert_eq!(r.during("vkAcquireNextImageKHR").unwrap(), 7);
    }

    #[test]
    fn mismatch_message_lists_every_count() {
        let e = GpuError::ImageCountMismatch {
            images: 3,
            command_buffers: 3,
            fences: 2,
            framebuffers: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("3 images"));
        assert!(msg.contains("2 fences"));
    }
}
