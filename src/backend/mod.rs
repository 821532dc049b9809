// Backend module - Vulkan abstraction layer
//
// Thin owners around ash handles. Every type here destroys what it created
// in Drop (or in an explicit `destroy` when the allocator is involved).

pub mod buffer;
pub mod commands;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod queue;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{Buffer, Image};
pub use commands::CommandPool;
pub use device::{DeviceRequest, Queue, VulkanDevice};
pub use instance::{Instance, InstanceRequest};
pub use queue::{QueueCapabilities, QueueDescriptor};
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainConfig, SwapchainStatus};
pub use sync::{FramePhase, FrameRing, FrameSync};
