/// GpuContext - Shared Vulkan objects for every resource and the recorder
///
/// Contains everything needed for GPU operations:
/// - Instance and logical device
/// - Allocator for memory management
/// - Queue for command submission
/// - Extension loaders (push descriptors, debug utils)
/// - Device limits the backend depends on

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Mutex;
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::{Config, DebugSeverity};
use ember_3d_engine::{engine_error, engine_info, engine_warn};

const SOURCE: &str = "ember3d::vulkan";

/// Shared GPU context
///
/// Owned through an `Arc` by the device, the command streams and the resources.
/// Dropping the last reference destroys the device and the instance.
pub struct GpuContext {
    /// Vulkan entry (keeps the loader alive)
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,

    /// GPU memory allocator; dropped before the device is destroyed
    pub allocator: ManuallyDrop<Mutex<Allocator>>,

    /// Graphics + compute queue
    pub queue: vk::Queue,
    pub queue_family: u32,

    pub push_descriptor: ash::khr::push_descriptor::Device,
    /// Command labels, present when validation is enabled
    pub debug_labels: Option<ash::ext::debug_utils::Device>,

    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    /// Offset alignment satisfying uniform, storage and texel buffer bindings
    pub dynamic_offset_alignment: u64,
    /// Nanoseconds per timestamp tick
    pub timestamp_period: f32,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub sampler_anisotropy: bool,
}

fn init_error(what: &str, err: impl std::fmt::Debug) -> Error {
    engine_error!(SOURCE, "{}: {:?}", what, err);
    Error::InitializationFailed(format!("{}: {:?}", what, err))
}

impl GpuContext {
    /// Create a headless Vulkan 1.3 device
    ///
    /// Picks the first physical device exposing a queue family with graphics
    /// and compute support, and enables dynamic rendering, synchronization2 and
    /// push descriptors.
    pub fn new(config: &Config) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| init_error("Failed to load Vulkan library", e))?;

            let app_name = CString::new(config.app_name.as_str()).unwrap_or_default();
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Ember3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let enable_validation = config.enable_validation && cfg!(feature = "vulkan-validation");
            if config.enable_validation && !enable_validation {
                engine_warn!(SOURCE, "Validation requested but the vulkan-validation feature is disabled");
            }

            let mut extension_names = Vec::new();
            let mut layer_names = Vec::new();
            if enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| init_error("Failed to create Vulkan instance", e))?;

            let (debug_utils_loader, debug_messenger) = if enable_validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);

                crate::debug::init_debug_config(crate::debug::Config {
                    severity: config.debug_severity,
                    output: config.debug_output.clone(),
                    message_filter: config.debug_message_filter,
                    break_on_error: config.break_on_validation_error,
                    panic_on_error: config.panic_on_error,
                    enable_stats: config.enable_validation_stats,
                });

                let severity_flags = match config.debug_severity {
                    DebugSeverity::ErrorsOnly => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                    DebugSeverity::ErrorsAndWarnings => {
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    }
                    DebugSeverity::All => {
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    }
                };

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(severity_flags)
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| init_error("Failed to create debug messenger", e))?;

                (Some(debug_utils), Some(messenger))
            } else {
                (None, None)
            };

            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| init_error("Failed to enumerate physical devices", e))?;

            let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
            let (physical_device, queue_family) = physical_devices
                .into_iter()
                .find_map(|pd| {
                    instance
                        .get_physical_device_queue_family_properties(pd)
                        .iter()
                        .position(|qf| qf.queue_flags.contains(required))
                        .map(|index| (pd, index as u32))
                })
                .ok_or_else(|| init_error("No Vulkan GPU with a graphics+compute queue", "none found"))?;

            let properties = instance.get_physical_device_properties(physical_device);
            let supported = instance.get_physical_device_features(physical_device);
            if properties.limits.timestamp_compute_and_graphics == vk::FALSE {
                engine_warn!(SOURCE, "Device does not support timestamps on every queue; profiler results will be empty");
            }

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family)
                .queue_priorities(&queue_priorities)];

            let device_extension_names = [ash::khr::push_descriptor::NAME.as_ptr()];

            let features = vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
                .geometry_shader(supported.geometry_shader == vk::TRUE)
                .tessellation_shader(supported.tessellation_shader == vk::TRUE)
                .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
                .depth_clamp(supported.depth_clamp == vk::TRUE)
                .independent_blend(supported.independent_blend == vk::TRUE)
                .multi_draw_indirect(supported.multi_draw_indirect == vk::TRUE);
            let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
                .dynamic_rendering(true)
                .synchronization2(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&features)
                .push_next(&mut features13);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| init_error("Failed to create logical device", e))?;

            let queue = device.get_device_queue(queue_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| init_error("Failed to create GPU allocator", e))?;

            let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);
            let debug_labels = debug_utils_loader
                .as_ref()
                .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

            let device_name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            engine_info!(SOURCE, "Using '{}' (queue family {})", device_name, queue_family);

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                queue,
                queue_family,
                push_descriptor,
                debug_labels,
                debug_utils_loader,
                debug_messenger,
                dynamic_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment
                    .max(properties.limits.min_storage_buffer_offset_alignment)
                    .max(properties.limits.min_texel_buffer_offset_alignment)
                    .max(16),
                timestamp_period: properties.limits.timestamp_period,
                geometry_shader: supported.geometry_shader == vk::TRUE,
                tessellation_shader: supported.tessellation_shader == vk::TRUE,
                sampler_anisotropy: supported.sampler_anisotropy == vk::TRUE,
            })
        }
    }

    /// Lock the allocator, recovering from a poisoned lock
    pub fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // Free VkDeviceMemory pages BEFORE destroying the device
            ManuallyDrop::drop(&mut self.allocator);

            // Stop callbacks before the messenger goes away
            crate::debug::cleanup_debug_config();
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
