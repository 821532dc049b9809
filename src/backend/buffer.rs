// Buffers and images backed by gpu-allocator
//
// Both types own their allocation and give it back to the device allocator
// on drop.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::{CommandPool, VulkanDevice};

pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub location: MemoryLocation,
    allocation: Allocation,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer {name}"))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let allocation = match device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for {name}"));
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_buffer(handle, None) };
            let _ = device.allocator.lock().free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for {name}"));
        }

        Ok(Self {
            handle,
            size,
            location,
            allocation,
            device,
        })
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .context("Buffer memory is not host visible")?;
        copy_into(mapped, bytemuck::cast_slice(data))
    }

    /// Create a device-local buffer holding `data`, filled through a staging
    /// buffer and a blocking transfer on `queue`.
    pub fn upload<T: bytemuck::Pod>(
        device: Arc<VulkanDevice>,
        pool: &CommandPool,
        queue: vk::Queue,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            anyhow::bail!("Refusing to upload empty buffer {name}");
        }
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Buffer::new(
            device.clone(),
            &format!("{name} (staging)"),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(bytes)?;

        let buffer = Buffer::new(
            device,
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        pool.one_time_submit(queue, |device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, staging.handle, buffer.handle, &[region]) };
            Ok(())
        })?;

        Ok(buffer)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.handle, None);
        }
        let _ = self
            .device
            .allocator
            .lock()
            .free(std::mem::take(&mut self.allocation));
    }
}

/// Copy `src` into the front of `dst`, failing if it does not fit
pub fn copy_into(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if src.len() > dst.len() {
        anyhow::bail!(
            "Write of {} bytes overflows buffer of {} bytes",
            src.len(),
            dst.len()
        );
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

/// A 2D image with a single view, e.g. a depth attachment
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    allocation: Allocation,
    device: Arc<VulkanDevice>,
}

impl Image {
    /// Create a depth buffer image, memory, and view
    pub fn depth(device: Arc<VulkanDevice>, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(handle) };

        let allocation = match device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "depth",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(handle, None) };
                return Err(e).context("Failed to allocate depth image memory");
            }
        };

        let cleanup = |allocation: Allocation| {
            unsafe { device.device.destroy_image(handle, None) };
            let _ = device.allocator.lock().free(allocation);
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        } {
            cleanup(allocation);
            return Err(e).context("Failed to bind depth image memory");
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                cleanup(allocation);
                return Err(e).context("Failed to create depth image view");
            }
        };

        Ok(Self {
            handle,
            view,
            format,
            extent,
            allocation,
            device,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.handle, None);
        }
        let _ = self
            .device
            .allocator
            .lock()
            .free(std::mem::take(&mut self.allocation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_into_fills_prefix() {
        let mut dst = [0u8; 6];
        copy_into(&mut dst, &[1, 2, 3]).unwrap();
        assert_eq!(dst, [1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn copy_into_rejects_overflow() {
        let mut dst = [0u8; 2];
        assert!(copy_into(&mut dst, &[1, 2, 3]).is_err());
        assert_eq!(dst, [0, 0]);
    }

    #[test]
    fn pod_data_casts_to_bytes() {
        let matrix = glam::Mat4::IDENTITY;
        let mut dst = [0u8; 64];
        copy_into(&mut dst, bytemuck::bytes_of(&matrix)).unwrap();
        assert_eq!(&dst[..4], &1.0f32.to_ne_bytes());
    }
}
