use ash::{ext::debug_utils, khr, vk, Entry, Instance};
use std::collections::BTreeSet;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::error::{RenderError, Result};
use crate::window::SurfaceSource;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices resolved for one physical device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Prefer a single family that can both draw and present; otherwise take
    /// the first of each.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let graphics = family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(index);

            if graphics && present {
                return Self {
                    graphics: Some(index),
                    present: Some(index),
                };
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if present && indices.present.is_none() {
                indices.present = Some(index);
            }
        }
        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, for queue creation and swapchain sharing.
    pub fn unique(&self) -> Vec<u32> {
        self.graphics
            .into_iter()
            .chain(self.present)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Capabilities, formats and present modes of the surface on the chosen device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Score used to pick between suitable devices; higher wins.
pub fn rate_device(properties: &vk::PhysicalDeviceProperties) -> u64 {
    let type_score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    };
    type_score + properties.limits.max_image_dimension2_d as u64
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the Vulkan instance, surface, and logical device.
///
/// Everything else in the renderer holds an `Arc<VulkanContext>` and must be
/// dropped before it.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    /// Optional features turned on at device creation.
    pub enabled_features: vk::PhysicalDeviceFeatures,
    debug: Option<DebugMessenger>,
    span: Span,
}

impl VulkanContext {
    pub fn new(window: &impl SurfaceSource, enable_validation: bool) -> Result<Self> {
        let span = info_span!("vulkan_context");
        let _guard = span.enter();

        let entry = Entry::linked();
        if enable_validation && !validation_layer_available(&entry)? {
            return Err(RenderError::ValidationUnavailable);
        }

        let instance = create_instance(&entry, window, enable_validation)?;

        let debug = if enable_validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&debug_messenger_info(), None) } {
                Ok(messenger) => Some(DebugMessenger { loader, messenger }),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let destroy_instance = |debug: &Option<DebugMessenger>| unsafe {
            if let Some(debug) = debug {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface_loader = khr::surface::Instance::new(&entry, &instance);
        let surface = match window.create_surface(&entry, &instance) {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(&debug);
                return Err(e);
            }
        };

        let device_parts = pick_physical_device(&instance, &surface_loader, surface)
            .and_then(|(physical_device, families)| {
                create_logical_device(&instance, physical_device, &families)
                    .map(|(device, features)| (physical_device, families, device, features))
            });

        let (physical_device, queue_families, device, enabled_features) = match device_parts {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(&debug);
                return Err(e);
            }
        };

        // both are Some after pick_physical_device
        let graphics_family = queue_families.graphics.unwrap_or_default();
        let present_family = queue_families.present.unwrap_or_default();
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        debug!(
            graphics_family,
            present_family,
            fill_mode_non_solid = enabled_features.fill_mode_non_solid == vk::TRUE,
            "queues ready"
        );

        drop(_guard);
        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            enabled_features,
            debug,
            span,
        })
    }

    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        query_surface_support(&self.surface_loader, self.physical_device, self.surface)
    }

    pub fn graphics_family(&self) -> u32 {
        self.queue_families.graphics.unwrap_or_default()
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        let _guard = self.span.enter();
        trace!("waiting for device idle");
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!(error = %e, "device did not go idle before teardown");
        }
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vulkan context destroyed");
    }
}

fn validation_layer_available(entry: &Entry) -> Result<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER)))
}

fn create_instance(
    entry: &Entry,
    window: &impl SurfaceSource,
    enable_validation: bool,
) -> Result<Instance> {
    let app_name = c"Galaxy Renderer";
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"Galaxy Engine")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names = window.required_extensions()?;
    if enable_validation {
        extension_names.push(debug_utils::NAME.as_ptr());
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        extension_names.push(khr::portability_enumeration::NAME.as_ptr());
        extension_names.push(khr::get_physical_device_properties2::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::default()
    };

    // covers messages emitted during vkCreateInstance itself
    let mut debug_info = debug_messenger_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names)
        .enabled_extension_names(&extension_names)
        .flags(create_flags);
    if enable_validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None)? };
    info!(validation = enable_validation, "vulkan instance created");
    Ok(instance)
}

fn pick_physical_device(
    instance: &Instance,
    surface_loader: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<(u64, vk::PhysicalDevice, QueueFamilyIndices)> = None;
    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(families) =
            suitable_families(instance, surface_loader, surface, physical_device)?
        else {
            debug!(device = %name, "device rejected");
            continue;
        };

        let score = rate_device(&properties);
        debug!(device = %name, score, device_type = ?properties.device_type, "device candidate");
        if best.map_or(true, |(best_score, ..)| score > best_score) {
            best = Some((score, physical_device, families));
        }
    }

    let (_, physical_device, families) = best.ok_or(RenderError::NoSuitableDevice)?;
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    info!(
        device = ?properties.device_name_as_c_str().unwrap_or(c"unknown"),
        "selected physical device"
    );
    Ok((physical_device, families))
}

/// Queue families if the device can render to and present on `surface`.
fn suitable_families(
    instance: &Instance,
    surface_loader: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<Option<QueueFamilyIndices>> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let indices = QueueFamilyIndices::find(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    });
    if !indices.is_complete() {
        return Ok(None);
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device)? };
    let has_swapchain = extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str() == Ok(khr::swapchain::NAME));
    if !has_swapchain {
        return Ok(None);
    }

    let support = query_surface_support(surface_loader, physical_device, surface)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Ok(None);
    }

    Ok(Some(indices))
}

fn query_surface_support(
    surface_loader: &khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)?,
            formats: surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)?,
        })
    }
}

/// The subset of `available` the renderer turns on: non-solid fill for
/// wireframe and point pipelines.
pub fn select_device_features(available: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        fill_mode_non_solid: available.fill_mode_non_solid,
        ..Default::default()
    }
}

fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::PhysicalDeviceFeatures)> {
    let priorities = [1.0f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let extension_names = [
        khr::swapchain::NAME.as_ptr(),
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        khr::portability_subset::NAME.as_ptr(),
    ];

    let available = unsafe { instance.get_physical_device_features(physical_device) };
    let features = select_device_features(&available);
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
    Ok((device, features))
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(target: "vulkan", ?message_type, "{message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(target: "vulkan", ?message_type, "{message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            debug!(target: "vulkan", ?message_type, "{message}")
        }
        _ => trace!(target: "vulkan", ?message_type, "{message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_draws_and_presents() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i != 0);
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i == 1);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert!(indices.is_complete());
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_presentation() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn discrete_gpus_outrank_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        discrete.limits.max_image_dimension2_d = 16384;

        let mut integrated = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Default::default()
        };
        integrated.limits.max_image_dimension2_d = 16384;

        assert_eq!(rate_device(&discrete), 1000 + 16384);
        assert_eq!(rate_device(&integrated), 100 + 16384);
        assert!(rate_device(&discrete) > rate_device(&integrated));
    }

    #[test]
    fn enables_non_solid_fill_only_when_available() {
        let available = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: vk::TRUE,
            geometry_shader: vk::TRUE,
            wide_lines: vk::TRUE,
            ..Default::default()
        };
        let enabled = select_device_features(&available);
        assert_eq!(enabled.fill_mode_non_solid, vk::TRUE);
        assert_eq!(enabled.geometry_shader, vk::FALSE);
        assert_eq!(enabled.wide_lines, vk::FALSE);

        let enabled = select_device_features(&vk::PhysicalDeviceFeatures::default());
        assert_eq!(enabled.fill_mode_non_solid, vk::FALSE);
    }
}
