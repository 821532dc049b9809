// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Queue family assignment from requested capabilities
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::instance::missing_names;
use super::queue::{assign_queue_families, QueueCapabilities, QueueDescriptor};
use super::{Instance, Surface};

/// What the application needs from a GPU
pub struct DeviceRequest<'a> {
    pub required: QueueCapabilities,
    /// Extra device extensions. The swapchain extension is added when
    /// presentation is required.
    pub extensions: Vec<&'static CStr>,
    /// Surface to present to, mandatory when `required` has PRESENTATION
    pub surface: Option<&'a Surface>,
}

/// A created queue and the capabilities it was assigned
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
    pub capabilities: QueueCapabilities,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device goes away
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<Instance>,

    pub queues: Vec<Queue>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

struct Candidate {
    physical_device: vk::PhysicalDevice,
    descriptors: Vec<QueueDescriptor>,
    score: u32,
}

impl VulkanDevice {
    /// Pick a GPU that satisfies `request` and create the logical device.
    pub fn new(instance: Arc<Instance>, request: &DeviceRequest) -> Result<Arc<Self>> {
        let presenting = request.required.contains(QueueCapabilities::PRESENTATION);
        if presenting && request.surface.is_none() {
            anyhow::bail!("Presentation requested without a surface");
        }

        let mut extensions = request.extensions.clone();
        if presenting && !extensions.contains(&khr::Swapchain::name()) {
            extensions.push(khr::Swapchain::name());
        }

        // Step 1: Pick physical device (GPU)
        let candidate = Self::pick_physical_device(&instance, request, &extensions)?;
        let physical_device = candidate.physical_device;

        // Step 2: Create logical device
        let device =
            Self::create_logical_device(&instance, physical_device, &candidate.descriptors, &extensions)?;

        let queues: Vec<Queue> = candidate
            .descriptors
            .iter()
            .map(|descriptor| Queue {
                family_index: descriptor.family_index,
                handle: unsafe { device.get_device_queue(descriptor.family_index, 0) },
                capabilities: descriptor.capabilities,
            })
            .collect();

        for queue in &queues {
            log::info!(
                "Queue family {} -> {:?}",
                queue.family_index,
                queue.capabilities
            );
        }

        // Step 3: Cache device properties
        let properties = unsafe {
            instance
                .handle
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .handle
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 4: Create memory allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e).context("Failed to create memory allocator");
            }
        };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            queues,
            properties,
            memory_properties,
        }))
    }

    fn pick_physical_device(
        instance: &Instance,
        request: &DeviceRequest,
        extensions: &[&'static CStr],
    ) -> Result<Candidate> {
        let devices = unsafe { instance.handle.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No physical device found");
        }

        // Score each device
        let mut best: Option<Candidate> = None;

        for physical_device in devices {
            let props = unsafe {
                instance
                    .handle
                    .get_physical_device_properties(physical_device)
            };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
            log::debug!("Found GPU: {} ({:?})", name, props.device_type);

            // Check device extensions
            let available = unsafe {
                instance
                    .handle
                    .enumerate_device_extension_properties(physical_device)
            }?;
            let available: Vec<&CStr> = available
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
                .collect();
            let missing = missing_names(extensions, &available);
            if !missing.is_empty() {
                log::debug!("Skipping {}: missing extensions {:?}", name, missing);
                continue;
            }

            // Assign queue families
            let families = unsafe {
                instance
                    .handle
                    .get_physical_device_queue_family_properties(physical_device)
            };
            let descriptors = assign_queue_families(request.required, &families, |family| {
                request
                    .surface
                    .map_or(false, |surface| surface.supports_presentation(physical_device, family))
            });
            let Some(descriptors) = descriptors else {
                log::debug!("Skipping {}: queue capabilities not met", name);
                continue;
            };

            // Score device (prefer discrete GPU)
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    physical_device,
                    descriptors,
                    score,
                });
            }
        }

        best.context("Couldn't find a suitable physical device")
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        descriptors: &[QueueDescriptor],
        extensions: &[&'static CStr],
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = descriptors
            .iter()
            .map(|descriptor| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(descriptor.family_index)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<_> = extensions.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        Ok(device)
    }

    /// First queue that was assigned `capability`
    pub fn queue(&self, capability: QueueCapabilities) -> Option<&Queue> {
        self.queues
            .iter()
            .find(|queue| queue.capabilities.contains(capability))
    }

    pub fn graphics_queue(&self) -> Result<&Queue> {
        self.queue(QueueCapabilities::GRAPHICS)
            .context("Device was created without a graphics queue")
    }

    pub fn present_queue(&self) -> Result<&Queue> {
        self.queue(QueueCapabilities::PRESENTATION)
            .context("Device was created without a present queue")
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Allocator frees its memory blocks through the device
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
