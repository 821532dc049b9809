// Vulkan Instance - Loader, instance and debug messenger
//
// Responsibilities:
// - Load the Vulkan library
// - Check requested layers and extensions against what the loader offers
// - Enable the surface extensions a window needs
// - Route validation messages into `log`

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"vkfw";

/// What the application wants from the instance
#[derive(Debug, Clone)]
pub struct InstanceRequest<'a> {
    pub app_name: &'a str,
    pub app_version: u32,
    /// Extra instance extensions; creation fails if one is missing
    pub extensions: Vec<&'static CStr>,
    /// Display the surface will be created for. Its platform surface
    /// extensions are enabled automatically.
    pub display: Option<RawDisplayHandle>,
    /// Enable the Khronos validation layer if it is installed
    pub enable_validation: bool,
}

pub struct Instance {
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub handle: ash::Instance,
    pub entry: Entry,
    extensions: Vec<&'static CStr>,
}

impl Instance {
    pub fn new(request: &InstanceRequest) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", request.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: See what the loader offers
        let available_layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;

        let layer_names: Vec<&CStr> = available_layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();
        let extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        log::debug!("Available layers: {:?}", layer_names);
        log::debug!("Available instance extensions: {:?}", extension_names);

        // Step 3: Collect extensions
        let mut extensions = request.extensions.clone();

        if let Some(display) = request.display {
            let surface_extensions = ash_window::enumerate_required_extensions(display)
                .context("Display has no Vulkan surface support")?;
            for &name in surface_extensions {
                // ash-window hands out pointers to static strings
                let name: &'static CStr = unsafe { CStr::from_ptr(name) };
                push_unique(&mut extensions, name);
            }
        }

        let missing = missing_names(&extensions, &extension_names);
        if !missing.is_empty() {
            anyhow::bail!("Missing instance extensions: {:?}", missing);
        }

        // Step 4: Validation, only when installed
        let validation = request.enable_validation && layer_names.contains(&VALIDATION_LAYER);
        if request.enable_validation && !validation {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        if validation && extension_names.contains(&DebugUtils::name()) {
            push_unique(&mut extensions, DebugUtils::name());
        }
        let debug_messenger = validation && extensions.contains(&DebugUtils::name());

        let layers: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        // Step 5: Create instance
        let app_name = CString::new(request.app_name)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(request.app_version)
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layers);

        let handle = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        log::info!(
            "Instance created (validation: {}, extensions: {:?})",
            validation,
            extensions
        );

        // Step 6: Debug messenger
        let debug_utils = if debug_messenger {
            match setup_debug_messenger(&entry, &handle) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    unsafe { handle.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            debug_utils,
            handle,
            entry,
            extensions,
        }))
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.contains(&name)
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.handle.destroy_instance(None);
        }
    }
}

fn push_unique(names: &mut Vec<&'static CStr>, name: &'static CStr) {
    if !names.contains(&name) {
        names.push(name);
    }
}

/// Names from `wanted` that do not appear in `available`
pub(crate) fn missing_names<'a>(wanted: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let wanted = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let available = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];

        assert_eq!(missing_names(&wanted, &available), vec![c"VK_KHR_xcb_surface"]);
        assert!(missing_names(&[], &available).is_empty());
    }

    #[test]
    fn push_unique_skips_duplicates() {
        let mut names = vec![c"VK_KHR_surface"];
        push_unique(&mut names, c"VK_KHR_surface");
        push_unique(&mut names, c"VK_EXT_debug_utils");
        assert_eq!(names, vec![c"VK_KHR_surface", c"VK_EXT_debug_utils"]);
    }
}
