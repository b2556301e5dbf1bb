// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::info;
use vkframe_render::{HostWindow, RenderSize};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

pub use winit;

/// A winit window handed to a GPU session.
///
/// Fixed size: the swapchain is never recreated, so the window is created
/// non-resizable.
pub struct HostedWindow {
    window: Window,
}

impl HostedWindow {
    pub fn open(event_loop: &ActiveEventLoop, title: &str, size: RenderSize) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)))
            .with_resizable(false);
        let window = event_loop.create_window(attrs).context("create_window")?;
        let inner = window.inner_size();
        info!("window \"{title}\" open ({}x{})", inner.width, inner.height);
        Ok(Self { window })
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasWindowHandle for HostedWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for HostedWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HostWindow for HostedWindow {
    fn client_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }
}
