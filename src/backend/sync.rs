// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, plus the ring that
// decides which set a frame uses.
//
// Acquire semaphores and fences belong to a frame slot. The semaphore a
// present waits on belongs to a swapchain image: presentation is not
// tracked by any fence, so it is only safe to reuse once that image comes
// back from acquire.

use anyhow::Result;
use ash::vk;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device.device.create_semaphore(&semaphore_info, None)?;
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                image_available,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Grow or shrink `items` to `len`.
///
/// New items are pushed one at a time, so on error `items` still holds
/// everything created so far and the caller can release it.
pub fn resize_with<T>(
    items: &mut Vec<T>,
    len: usize,
    mut create: impl FnMut() -> Result<T>,
    mut destroy: impl FnMut(T),
) -> Result<()> {
    while items.len() > len {
        if let Some(item) = items.pop() {
            destroy(item);
        }
    }
    while items.len() < len {
        items.push(create()?);
    }
    Ok(())
}

/// One binary semaphore per swapchain image. The device must be idle when
/// shrinking.
pub fn resize_semaphores(
    device: &ash::Device,
    semaphores: &mut Vec<vk::Semaphore>,
    len: usize,
) -> Result<()> {
    let info = vk::SemaphoreCreateInfo::builder();
    resize_with(
        semaphores,
        len,
        || Ok(unsafe { device.create_semaphore(&info, None) }?),
        |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
    )
}

/// Where the current frame slot is in its submit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// The GPU may still be using the slot
    Pending,
    /// Fence waited on; the slot's buffers are free for the CPU
    Ready,
    /// Image acquired, command buffer recording
    Recording,
}

impl FramePhase {
    pub fn transition(self, next: Self) -> Result<Self> {
        use FramePhase::*;
        match (self, next) {
            // Ready -> Ready happens when an acquire came back out of date
            (Pending | Ready, Ready) | (Ready, Recording) | (Recording, Pending) => Ok(next),
            _ => anyhow::bail!("frame cannot go from {:?} to {:?}", self, next),
        }
    }
}

/// Round-robin index over the frames in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameRing {
    len: usize,
    current: usize,
}

impl FrameRing {
    pub fn new(len: usize) -> Self {
        Self {
            len: len.max(1),
            current: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.len;
        self.current
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps_around() {
        let mut ring = FrameRing::new(3);
        let visited: Vec<usize> = (0..7).map(|_| ring.advance()).collect();
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn recording_requires_a_waited_fence() {
        assert!(FramePhase::Pending.transition(FramePhase::Recording).is_err());
        let ready = FramePhase::Pending.transition(FramePhase::Ready).unwrap();
        let recording = ready.transition(FramePhase::Recording).unwrap();
        assert!(recording.transition(FramePhase::Ready).is_err());
        assert_eq!(
            recording.transition(FramePhase::Pending).unwrap(),
            FramePhase::Pending
        );
    }

    #[test]
    fn out_of_date_acquire_can_wait_again() {
        let ready = FramePhase::Ready.transition(FramePhase::Ready).unwrap();
        assert_eq!(ready, FramePhase::Ready);
        assert!(FramePhase::Ready.transition(FramePhase::Pending).is_err());
    }

    #[test]
    fn resize_creates_and_destroys_the_difference() {
        let mut next = 0;
        let mut destroyed = Vec::new();
        let mut items = Vec::new();

        let mut create = || {
            next += 1;
            Ok(next)
        };
        resize_with(&mut items, 3, &mut create, |_| unreachable!()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        resize_with(&mut items, 1, &mut create, |item| destroyed.push(item)).unwrap();
        assert_eq!(items, vec![1]);
        assert_eq!(destroyed, vec![3, 2]);
    }

    #[test]
    fn resize_keeps_partial_results_on_error() {
        let mut items = vec![10];
        let mut calls = 0;
        let result = resize_with(
            &mut items,
            4,
            || {
                calls += 1;
                if calls == 2 {
                    anyhow::bail!("out of semaphores");
                }
                Ok(calls)
            },
            |_| {},
        );
        assert!(result.is_err());
        assert_eq!(items, vec![10, 1]);
    }

    #[test]
    fn empty_ring_holds_one_frame() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.current(), 0);
    }
}
