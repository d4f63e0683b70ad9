// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, warn};

use crate::error::VkError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vk {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vk {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[vk {types:?}] {msg}");
    } else {
        debug!("[vk {types:?}] {msg}");
    }
    vk::FALSE
}

/// First entry of `required` missing from `available`.
pub(crate) fn first_missing<'a>(required: &[&'a CStr], available: &[String]) -> Option<&'a CStr> {
    required
        .iter()
        .copied()
        .find(|want| !available.iter().any(|have| have.as_bytes() == want.to_bytes()))
}

fn to_names<T>(props: &[T], name: impl Fn(&T) -> &[c_char]) -> Vec<String> {
    props
        .iter()
        .map(|p| {
            // SAFETY: Vulkan fills these arrays with NUL-terminated strings.
            unsafe { CStr::from_ptr(name(p).as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Instance, surface and (optionally) the validation messenger.
///
/// Dropped last: everything created from the device must already be gone.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) verify extensions + layers
    // 2) create VkInstance
    // 3) create debug messenger
    // 4) create VkSurfaceKHR from THIS instance
    pub unsafe fn new(
        app_name: &str,
        validation: bool,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = Entry::linked();
        let instance = create_instance(&entry, dh, app_name, validation)?;

        // From here on a failure must unwind the instance by hand.
        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
            Ok(s) => s,
            Err(e) => {
                if let Some(d) = &debug {
                    d.loader.destroy_debug_utils_messenger(d.messenger, None);
                }
                instance.destroy_instance(None);
                return Err(anyhow::Error::from(VkError::from(e)).context("ash_window::create_surface"));
            }
        };

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            debug,
        })
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<ash::Instance> {
    let app = CString::new(app_name).context("app name contains NUL")?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"Ember".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let wsi = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;
    let mut ext_names: Vec<&CStr> = wsi.iter().map(|&p| CStr::from_ptr(p)).collect();
    if validation {
        ext_names.push(debug_utils::NAME);
    }

    let available = to_names(
        &entry
            .enumerate_instance_extension_properties(None)
            .context("enumerate_instance_extension_properties")?,
        |e| &e.extension_name[..],
    );
    if let Some(missing) = first_missing(&ext_names, &available) {
        return Err(VkError::MissingInstanceExtension(missing.to_string_lossy().into_owned()).into());
    }

    let layers: Vec<&CStr> = if validation {
        let have = to_names(
            &entry
                .enumerate_instance_layer_properties()
                .context("enumerate_instance_layer_properties")?,
            |l| &l.layer_name[..],
        );
        if first_missing(&[VALIDATION_LAYER], &have).is_some() {
            return Err(VkError::MissingLayer(VALIDATION_LAYER.to_string_lossy().into_owned()).into());
        }
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };

    let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|n| n.as_ptr()).collect();
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|n| n.as_ptr()).collect();

    info!(
        "instance: api 1.3, {} extensions, validation={}",
        ext_ptrs.len(),
        validation
    );

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    Ok(entry
        .create_instance(&create_info, None)
        .map_err(VkError::from)
        .context("create_instance")?)
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .map_err(VkError::from)
        .context("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, messenger })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_missing_reports_absent_name() {
        let have = vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_xlib_surface".to_string(),
        ];
        assert_eq!(first_missing(&[c"VK_KHR_surface"], &have), None);
        assert_eq!(
            first_missing(&[c"VK_KHR_surface", c"VK_EXT_debug_utils"], &have),
            Some(c"VK_EXT_debug_utils")
        );
    }

    #[test]
    fn first_missing_is_exact_match() {
        let have = vec!["VK_KHR_surface_extra".to_string()];
        assert!(first_missing(&[c"VK_KHR_surface"], &have).is_some());
    }
}
