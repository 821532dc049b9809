// Headless device bring-up: prints the selected GPU, its memory heaps and
// how the requested queue capabilities were assigned. No window needed.

use anyhow::Result;
use ash::vk;
use vkfw::backend::{DeviceRequest, Instance, InstanceRequest, QueueCapabilities, VulkanDevice};
use vkfw::Settings;

fn main() -> Result<()> {
    let (settings, fallback) = Settings::load();
    vkfw::init_logging(&settings)?;
    Settings::report_fallback(fallback.as_ref());

    let instance = Instance::new(&InstanceRequest {
        app_name: "device_info",
        app_version: settings.application.vk_version(),
        extensions: Vec::new(),
        display: None,
        enable_validation: settings.debug.enable_validation(),
    })?;

    let device = VulkanDevice::new(
        instance,
        &DeviceRequest {
            required: QueueCapabilities::GRAPHICS
                | QueueCapabilities::COMPUTE
                | QueueCapabilities::TRANSFER,
            extensions: Vec::new(),
            surface: None,
        },
    )?;

    let properties = &device.properties;
    log::info!("Device: {} ({:?})", device.name(), properties.device_type);
    log::info!(
        "Driver version: {:#x}, vendor {:#06x}, device {:#06x}",
        properties.driver_version,
        properties.vendor_id,
        properties.device_id
    );

    let memory = &device.memory_properties;
    for (i, heap) in memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .enumerate()
    {
        let local = heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL);
        log::info!(
            "Heap {}: {} MiB{}",
            i,
            heap.size / (1024 * 1024),
            if local { " (device local)" } else { "" }
        );
    }

    for queue in &device.queues {
        log::info!("Queue family {}: {:?}", queue.family_index, queue.capabilities);
    }

    Ok(())
}
