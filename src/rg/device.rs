//! The Vulkan instance, physical device, logical device and its three
//! queues, owning a process-wide [`Allocator`].

use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};

use crate::rg::allocator::Allocator;
use crate::rg::error::{RgError, RgResult};

/// Physical limits relevant to the RG layer (max push-constant size,
/// anisotropy, etc).
#[derive(Debug, Clone, Copy)]
pub struct PhysicalLimits {
    /// `maxPushConstantsSize`.
    pub max_push_constants_size: u32,
    /// `maxSamplerAnisotropy`.
    pub max_sampler_anisotropy: f32,
}

/// The three logical queues a [`Device`] exposes. They may alias the
/// same family and the same `VkQueue`.
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    /// Graphics queue + family index.
    pub graphics: (vk::Queue, u32),
    /// Compute queue + family index.
    pub compute: (vk::Queue, u32),
    /// Transfer queue + family index.
    pub transfer: (vk::Queue, u32),
}

/// Owns the Vulkan instance, physical device selection, logical device,
/// queues, and the process-wide device-memory [`Allocator`].
///
/// Created once at startup, destroyed at shutdown; destruction waits
/// until the device is idle.
pub struct Device {
    entry: Entry,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queues: Queues,
    limits: PhysicalLimits,
    allocator: Allocator,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Device {
    /// Raw `ash::Device` handle, cloned cheaply for resource wrappers.
    pub fn raw(&self) -> ash::Device {
        self.device.clone()
    }

    /// The Vulkan instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The three logical queues.
    pub fn queues(&self) -> Queues {
        self.queues
    }

    /// Physical device limits relevant to the RG layer.
    pub fn limits(&self) -> PhysicalLimits {
        self.limits
    }

    /// The process-wide device-memory allocator.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Mutable access to the allocator for buffer/image creation paths.
    pub fn allocator_mut(&mut self) -> &mut Allocator {
        &mut self.allocator
    }

    /// Create a device from an already-created instance and a window's
    /// required extensions, selecting the first physical device that
    /// exposes graphics/compute/transfer queue families and enabling
    /// validation if requested.
    pub fn new(
        required_instance_extensions: &[String],
        surface_for_presentation_support: Option<vk::SurfaceKHR>,
        surface_loader: Option<&ash::extensions::khr::Surface>,
        app_name: &str,
        enable_validation: bool,
    ) -> RgResult<Self> {
        let entry = unsafe {
            Entry::load().map_err(|e| RgError::InitializationFailed(format!("failed to load Vulkan: {e:?}")))?
        };

        let app_name_cstr = CString::new(app_name).unwrap();
        let engine_name_cstr = CString::new("rg").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extension_cstrings: Vec<CString> = required_instance_extensions
            .iter()
            .map(|e| CString::new(e.as_str()).unwrap())
            .collect();
        if enable_validation {
            extension_cstrings.push(CString::from(DebugUtils::name()));
        }
        let extension_ptrs: Vec<*const i8> = extension_cstrings.iter().map(|e| e.as_ptr()).collect();

        let layer_name = CString::new("VK_LAYER_KHRONOS_validation").unwrap();
        let layer_ptrs: Vec<*const i8> = if enable_validation { vec![layer_name.as_ptr()] } else { vec![] };

        let instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None)? };
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        let physical_devices = unsafe { instance.enumerate_physical_devices()? };
        let physical_device = *physical_devices
            .first()
            .ok_or_else(|| RgError::InitializationFailed("no Vulkan physical devices".into()))?;

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let supports_present = |family: u32| -> RgResult<bool> {
            match (surface_for_presentation_support, surface_loader) {
                (Some(surface), Some(loader)) => Ok(unsafe {
                    loader.get_physical_device_surface_support(physical_device, family, surface)?
                }),
                _ => Ok(true),
            }
        };

        let mut graphics_family = None;
        for (i, f) in queue_families.iter().enumerate() {
            if f.queue_flags.contains(vk::QueueFlags::GRAPHICS) && supports_present(i as u32)? {
                graphics_family = Some(i as u32);
                break;
            }
        }
        let graphics_family = graphics_family
            .ok_or_else(|| RgError::InitializationFailed("no graphics queue family with presentation support".into()))?;
        let compute_family = queue_families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .unwrap_or(graphics_family as usize) as u32;
        let transfer_family = queue_families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::TRANSFER))
            .unwrap_or(graphics_family as usize) as u32;

        let unique_families: Vec<u32> = {
            let mut v = vec![graphics_family, compute_family, transfer_family];
            v.sort_unstable();
            v.dedup();
            v
        };
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let device_extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features)
            .enabled_layer_names(&layer_ptrs);

        let device = unsafe { instance.create_device(physical_device, &device_info, None)? };

        let get_queue = |family: u32| unsafe { device.get_device_queue(family, 0) };
        let queues = Queues {
            graphics: (get_queue(graphics_family), graphics_family),
            compute: (get_queue(compute_family), compute_family),
            transfer: (get_queue(transfer_family), transfer_family),
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = PhysicalLimits {
            max_push_constants_size: properties.limits.max_push_constants_size,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
        };

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let allocator = Allocator::new(device.clone(), memory_properties);

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            queues,
            limits,
            allocator,
            debug_utils,
            debug_messenger,
        })
    }

    /// Entry point, exposed for surface creation via `ash-window`.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[validation] {message}");
    } else {
        log::warn!("[validation] {message}");
    }
    vk::FALSE
}
