// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A native window a GPU session can present into.
///
/// The host owns the OS message pump and decides when to stop; the session
/// only needs the raw handles to create a surface and the live client size
/// for surfaces that leave the swapchain extent up to the application.
pub trait HostWindow: HasWindowHandle + HasDisplayHandle {
    fn client_size(&self) -> RenderSize;
}
