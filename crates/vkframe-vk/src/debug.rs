// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use ash::ext::debug_report;
use ash::{vk, Entry, Instance};
use tracing::{debug, error, warn};

use crate::error::{GpuResult, VkResultExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReportLevel {
    Error,
    Warning,
    Info,
}

pub(crate) fn report_level(flags: vk::DebugReportFlagsEXT) -> ReportLevel {
    if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
        ReportLevel::Error
    } else if flags
        .intersects(vk::DebugReportFlagsEXT::WARNING | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING)
    {
        ReportLevel::Warning
    } else {
        ReportLevel::Info
    }
}

pub(crate) fn format_report(layer_prefix: Option<&str>, message: &str) -> String {
    match layer_prefix {
        Some(layer) => format!("[{layer}]{message}"),
        None => message.to_owned(),
    }
}

unsafe fn lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

unsafe extern "system" fn report_callback(
    flags: vk::DebugReportFlagsEXT,
    _object_type: vk::DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    _message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    _user: *mut c_void,
) -> vk::Bool32 {
    let layer = unsafe { lossy(p_layer_prefix) };
    let message = unsafe { lossy(p_message) }.unwrap_or_default();
    let line = format_report(layer.as_deref(), &message);
    match report_level(flags) {
        ReportLevel::Error => error!("{line}"),
        ReportLevel::Warning => warn!("{line}"),
        ReportLevel::Info => debug!("{line}"),
    }
    vk::FALSE
}

/// Create info for the callback: error and warning reports only.
pub(crate) fn callback_info() -> vk::DebugReportCallbackCreateInfoEXT<'static> {
    vk::DebugReportCallbackCreateInfoEXT {
        flags: vk::DebugReportFlagsEXT::ERROR | vk::DebugReportFlagsEXT::WARNING,
        pfn_callback: Some(report_callback),
        ..Default::default()
    }
}

/// Validation-message sink registered through `VK_EXT_debug_report`.
///
/// Inactive when the instance was created without the extension; then
/// unregistering is a no-op.
pub(crate) struct DebugReport {
    loader: Option<debug_report::Instance>,
    callback: vk::DebugReportCallbackEXT,
}

impl DebugReport {
    pub(crate) fn inactive() -> Self {
        Self {
            loader: None,
            callback: vk::DebugReportCallbackEXT::null(),
        }
    }

    /// `enabled` says whether the instance was created with the extension.
    pub(crate) fn register(entry: &Entry, instance: &Instance, enabled: bool) -> GpuResult<Self> {
        if !enabled {
            warn!("VK_EXT_debug_report unavailable; validation output disabled");
            return Ok(Self::inactive());
        }

        let loader = debug_report::Instance::new(entry, instance);
        let callback = unsafe { loader.create_debug_report_callback(&callback_info(), None) }
            .during("vkCreateDebugReportCallbackEXT")?;
        debug!("debug report registered");

        Ok(Self {
            loader: Some(loader),
            callback,
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.loader.is_some() && self.callback != vk::DebugReportCallbackEXT::null()
    }

    pub(crate) unsafe fn unregister(&mut self) {
        if let (Some(loader), true) = (&self.loader, self.is_active()) {
            unsafe { loader.destroy_debug_report_callback(self.callback, None) };
            debug!("debug report unregistered");
        }
        self.callback = vk::DebugReportCallbackEXT::null();
        self.loader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_prefix_is_bracketed() {
        assert_eq!(
            format_report(Some("Validation"), "bad layout"),
            "[Validation]bad layout"
        );
        assert_eq!(format_report(None, "bad layout"), "bad layout");
    }

    #[test]
    fn severities_route_to_levels() {
        use vk::DebugReportFlagsEXT as F;
        assert_eq!(report_level(F::ERROR), ReportLevel::Error);
        assert_eq!(report_level(F::ERROR | F::WARNING), ReportLevel::Error);
        assert_eq!(report_level(F::WARNING), ReportLevel::Warning);
        assert_eq!(report_level(F::PERFORMANCE_WARNING), ReportLevel::Warning);
        assert_eq!(report_level(F::INFORMATION), ReportLevel::Info);
        assert_eq!(report_level(F::DEBUG), ReportLevel::Info);
    }

    #[test]
    fn callback_never_aborts_the_call() {
        let msg = c"object not destroyed";
        let layer = c"Validation";
        let ret = unsafe {
            report_callback(
                vk::DebugReportFlagsEXT::INFORMATION,
                vk::DebugReportObjectTypeEXT::UNKNOWN,
                0,
                0,
                0,
                layer.as_ptr(),
                msg.as_ptr(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }

    #[test]
    fn null_pointers_are_tolerated() {
        let ret = unsafe {
            report_callback(
                vk::DebugReportFlagsEXT::ERROR,
                vk::DebugReportObjectTypeEXT::UNKNOWN,
                0,
                0,
                0,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }

    #[test]
    fn inactive_report_unregisters_nothing() {
        let mut report = DebugReport::inactive();
        assert!(!report.is_active());
        unsafe { report.unregister() };
        assert!(report.loader.is_none());
        assert_eq!(report.callback, vk::DebugReportCallbackEXT::null());
    }

    #[test]
    fn callback_filters_errors_and_warnings() {
        let info = callback_info();
        assert_eq!(
            info.flags,
            vk::DebugReportFlagsEXT::ERROR | vk::DebugReportFlagsEXT::WARNING
        );
        assert!(!info.flags.contains(vk::DebugReportFlagsEXT::INFORMATION));
        assert!(info.pfn_callback.is_some());
    }
}
