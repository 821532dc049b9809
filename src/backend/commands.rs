// Command pools and one-shot submissions

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(
        device: Arc<VulkanDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        let handle = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { handle, device })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.handle, command_buffers);
        }
    }

    /// Record with `record`, submit to `queue` and block until the GPU is
    /// done. Used for uploads outside the frame loop.
    pub fn one_time_submit<F>(&self, queue: vk::Queue, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = &self.device.device;
        let cmd = self
            .allocate(1)?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                self.free(&[cmd]);
                return Err(e).context("Failed to create upload fence");
            }
        };

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;

            record(device, cmd)?;

            unsafe { device.end_command_buffer(cmd) }?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                device.queue_submit(queue, &[submit_info.build()], fence)?;
                device.wait_for_fences(&[fence], true, u64::MAX)?;
            }
            Ok(())
        })();

        unsafe { device.destroy_fence(fence, None) };
        self.free(&[cmd]);

        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.handle, None);
        }
    }
}
