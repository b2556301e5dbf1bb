// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::ext::debug_report;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info, warn};

use crate::debug::DebugReport;
use crate::error::{GpuError, GpuResult, VkResultExt};
use crate::ledger::Stage;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const LEGACY_VALIDATION_LAYER: &CStr = c"VK_LAYER_LUNARG_standard_validation";

/// Which extensions the instance and device are opened with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtensionPolicy {
    /// Every extension the platform and adapter report.
    #[default]
    All,
    /// Window-system instance extensions, debug report in debug builds, and
    /// `VK_KHR_swapchain`.
    Required,
}

/// Validation layer to request for headers of the given version. SDKs older
/// than 1.1.106 only ship the deprecated LunarG meta-layer.
pub fn validation_layer_name(header_version_complete: u32) -> &'static CStr {
    if header_version_complete < vk::make_api_version(0, 1, 1, 106) {
        LEGACY_VALIDATION_LAYER
    } else {
        VALIDATION_LAYER
    }
}

/// Lowest memory type index whose bit is set in `type_bits` and whose
/// property flags include all of `required`.
pub fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let mut bits = type_bits;
    for i in 0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32) {
        if bits & 1 == 1 {
            let flags = props.memory_types[i as usize].property_flags;
            if flags & required == required {
                return Some(i);
            }
        }
        bits >>= 1;
    }
    None
}

/// First queue family advertising graphics support.
pub fn search_graphics_queue_index(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

fn names_of(props: &[vk::ExtensionProperties]) -> Vec<*const c_char> {
    props.iter().map(|p| p.extension_name.as_ptr()).collect()
}

fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|p| p.extension_name_as_c_str().is_ok_and(|n| n == name))
}

/// Instance, adapter, logical device and the single graphics queue.
pub struct DeviceContext {
    pub(crate) entry: Entry,
    pub(crate) instance: Instance,
    pub(crate) debug: DebugReport,

    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) memory_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: ash::Device,
    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,

    pub(crate) surface_loader: surface::Instance,
    pub(crate) swapchain_loader: swapchain::Device,
}

impl DeviceContext {
    /// Opens instance, debug report (debug builds), adapter and device.
    ///
    /// If device selection fails the instance and debug callback are
    /// released before returning.
    pub fn initialize(
        app_name: &str,
        display: RawDisplayHandle,
        policy: ExtensionPolicy,
    ) -> GpuResult<Self> {
        let entry = Entry::linked();
        let (instance, report_enabled) = create_instance(&entry, app_name, display, policy)?;

        let debug = if cfg!(debug_assertions) {
            match DebugReport::register(&entry, &instance, report_enabled) {
                Ok(d) => d,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            DebugReport::inactive()
        };

        match open_device(&instance, policy) {
            Ok((phys, memory_props, device, queue_family, queue)) => {
                let surface_loader = surface::Instance::new(&entry, &instance);
                let swapchain_loader = swapchain::Device::new(&instance, &device);
                Ok(Self {
                    entry,
                    instance,
                    debug,
                    phys,
                    memory_props,
                    device,
                    queue_family,
                    queue,
                    surface_loader,
                    swapchain_loader,
                })
            }
            Err(e) => {
                let mut debug = debug;
                unsafe {
                    debug.unregister();
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Stages this context holds, in creation order.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Instance];
        if self.debug.is_active() {
            stages.push(Stage::DebugReport);
        }
        stages.push(Stage::Device);
        stages
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> GpuResult<u32> {
        find_memory_type_index(&self.memory_props, type_bits, required)
            .ok_or(GpuError::NoMemoryType { type_bits, required })
    }

    pub(crate) unsafe fn destroy_device(&mut self) {
        debug!("destroying device");
        unsafe { self.device.destroy_device(None) };
    }

    pub(crate) unsafe fn unregister_debug_report(&mut self) {
        unsafe { self.debug.unregister() };
    }

    pub(crate) unsafe fn destroy_instance(&mut self) {
        debug!("destroying instance");
        unsafe { self.instance.destroy_instance(None) };
    }
}

/// Returns the instance and whether `VK_EXT_debug_report` was enabled on it.
fn create_instance(
    entry: &Entry,
    app_name: &str,
    display: RawDisplayHandle,
    policy: ExtensionPolicy,
) -> GpuResult<(Instance, bool)> {
    let app = CString::new(app_name)?;

    let app_info = vk::ApplicationInfo {
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .during("vkEnumerateInstanceExtensionProperties")?;

    let report_available = has_extension(&available, debug_report::NAME);
    let (extensions, report_enabled) = match policy {
        ExtensionPolicy::All => (names_of(&available), report_available),
        ExtensionPolicy::Required => {
            let mut v = ash_window::enumerate_required_extensions(display)
                .during("vkEnumerateInstanceExtensionProperties")?
                .to_vec();
            let wanted = cfg!(debug_assertions) && report_available;
            if wanted {
                v.push(debug_report::NAME.as_ptr());
            }
            (v, wanted)
        }
    };

    let mut layers: Vec<*const c_char> = Vec::new();
    if cfg!(debug_assertions) {
        let wanted = validation_layer_name(vk::HEADER_VERSION_COMPLETE);
        let present = unsafe { entry.enumerate_instance_layer_properties() }
            .during("vkEnumerateInstanceLayerProperties")?
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == wanted));
        if present {
            layers.push(wanted.as_ptr());
        } else {
            warn!("validation layer {wanted:?} not installed; continuing without it");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")?;
    info!(
        "instance created ({} extensions, {} layers)",
        extensions.len(),
        layers.len()
    );
    Ok((instance, report_enabled))
}

type OpenedDevice = (
    vk::PhysicalDevice,
    vk::PhysicalDeviceMemoryProperties,
    ash::Device,
    u32,
    vk::Queue,
);

fn open_device(instance: &Instance, policy: ExtensionPolicy) -> GpuResult<OpenedDevice> {
    // First adapter wins; no capability filtering beyond the graphics queue.
    let phys = unsafe { instance.enumerate_physical_devices() }
        .during("vkEnumeratePhysicalDevices")?
        .first()
        .copied()
        .ok_or(GpuError::NoPhysicalDevice)?;
    let memory_props = unsafe { instance.get_physical_device_memory_properties(phys) };

    let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let queue_family = search_graphics_queue_index(&families).ok_or(GpuError::NoGraphicsQueue)?;

    let priorities = [1.0_f32];
    let queue_info = vk::DeviceQueueCreateInfo {
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let available = unsafe { instance.enumerate_device_extension_properties(phys) }
        .during("vkEnumerateDeviceExtensionProperties")?;
    let extensions = match policy {
        ExtensionPolicy::All => names_of(&available),
        ExtensionPolicy::Required => vec![swapchain::NAME.as_ptr()],
    };

    let device_info = vk::DeviceCreateInfo {
        queue_create_info_count: 1,
        p_queue_create_infos: &queue_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let device =
        unsafe { instance.create_device(phys, &device_info, None) }.during("vkCreateDevice")?;
    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(
        "device ready: {name} (queue family {queue_family}, {} extensions)",
        extensions.len()
    );

    Ok((phys, memory_props, device, queue_family, queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(flags: &[u32]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: vk::MemoryPropertyFlags::from_raw(f),
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn lowest_matching_index_wins() {
        let props = memory(&[0x1, 0x5, 0x4]);
        let idx = find_memory_type_index(&props, 0b110, vk::MemoryPropertyFlags::from_raw(0x4));
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn masked_out_types_are_skipped() {
        let props = memory(&[0x1, 0x5, 0x4]);
        let idx = find_memory_type_index(&props, 0b100, vk::MemoryPropertyFlags::from_raw(0x4));
        assert_eq!(idx, Some(2));
    }

    #[test]
    fn flags_must_be_a_superset() {
        let props = memory(&[0x1, 0x4, 0x2]);
        let required = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type_index(&props, 0b111, required), None);

        let props = memory(&[0x1, 0x4, 0x3]);
        assert_eq!(find_memory_type_index(&props, 0b111, required), Some(2));
    }

    #[test]
    fn empty_requirement_matches_first_allowed_type() {
        let props = memory(&[0x2, 0x1]);
        let idx = find_memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::empty());
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn bits_beyond_type_count_are_ignored() {
        let props = memory(&[0x1]);
        let idx = find_memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::empty());
        assert_eq!(idx, None);
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_graphics_family_is_selected() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(search_graphics_queue_index(&families), Some(1));
    }

    #[test]
    fn compute_only_adapter_has_no_graphics_queue() {
        let families = [family(vk::QueueFlags::COMPUTE), family(vk::QueueFlags::TRANSFER)];
        assert_eq!(search_graphics_queue_index(&families), None);
    }

    #[test]
    fn old_headers_get_the_lunarg_layer() {
        let old = vk::make_api_version(0, 1, 1, 105);
        assert_eq!(validation_layer_name(old), LEGACY_VALIDATION_LAYER);
        let new = vk::make_api_version(0, 1, 1, 106);
        assert_eq!(validation_layer_name(new), VALIDATION_LAYER);
        assert_eq!(
            validation_layer_name(vk::HEADER_VERSION_COMPLETE),
            VALIDATION_LAYER
        );
    }

    #[test]
    fn extension_lookup_matches_by_name() {
        let mut prop = vk::ExtensionProperties::default();
        for (dst, src) in prop
            .extension_name
            .iter_mut()
            .zip(debug_report::NAME.to_bytes())
        {
            *dst = *src as c_char;
        }
        assert!(has_extension(&[prop], debug_report::NAME));
        assert!(!has_extension(&[prop], c"VK_KHR_surface"));
        assert_eq!(names_of(&[prop]).len(), 1);
    }
}
