// Scoped release of device-owned objects
//
// Everything created from the logical device (swapchain, views, render pass,
// pipeline, framebuffers, command pool, sync objects) is pushed onto a
// ReleaseStack as soon as it exists. Releasing the stack waits for the device
// to go idle and then destroys the objects in reverse creation order. A
// builder that fails half way unwinds its own stack before reporting, so no
// partially created handle stays reachable.

use anyhow::Result;
use ash::vk;

/// A handle owned by the logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceObject {
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    RenderPass(vk::RenderPass),
    ShaderModule(vk::ShaderModule),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    Framebuffer(vk::Framebuffer),
    CommandPool(vk::CommandPool),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
}

/// The device side of teardown
pub trait Destroyer {
    /// Block until no submitted work is in flight.
    fn wait_idle(&self) -> Result<(), vk::Result>;

    /// # Safety
    /// `object` must have been created from this device and must not be in use
    /// by the GPU.
    unsafe fn destroy(&self, object: DeviceObject);
}

#[derive(Debug, Default)]
pub struct ReleaseStack {
    objects: Vec<DeviceObject>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: DeviceObject) {
        self.objects.push(object);
    }

    /// Take over another stack whose objects were created after ours.
    pub fn absorb(&mut self, mut later: ReleaseStack) {
        self.objects.append(&mut later.objects);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Wait for the device to go idle, then destroy everything newest first.
    pub fn release<D: Destroyer>(&mut self, device: &D) {
        if self.objects.is_empty() {
            return;
        }

        // Destroying after a lost device is still valid, so a failed wait only
        // gets reported.
        if let Err(e) = device.wait_idle() {
            log::warn!("Device wait idle failed before teardown: {}", e);
        }

        log::debug!("Releasing {} device objects", self.objects.len());
        while let Some(object) = self.objects.pop() {
            unsafe { device.destroy(object) };
        }
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        if !self.objects.is_empty() {
            log::error!(
                "ReleaseStack dropped with {} live device objects, leaking them",
                self.objects.len()
            );
        }
    }
}

/// Run `build` with a fresh stack. On success the stack is handed back with
/// the value; on failure it is released before the error propagates.
pub fn build_scoped<D, T, F>(device: &D, build: F) -> Result<(T, ReleaseStack)>
where
    D: Destroyer,
    F: FnOnce(&mut ReleaseStack) -> Result<T>,
{
    let mut stack = ReleaseStack::new();
    match build(&mut stack) {
        Ok(value) => Ok((value, stack)),
        Err(e) => {
            if !stack.is_empty() {
                log::warn!("Unwinding {} objects after failed construction", stack.len());
            }
            stack.release(device);
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        WaitIdle,
        Destroy(DeviceObject),
    }

    /// Records every teardown call in order
    #[derive(Default)]
    pub struct RecordingDevice {
        pub calls: RefCell<Vec<Call>>,
        pub fail_wait: bool,
    }

    impl Destroyer for RecordingDevice {
        fn wait_idle(&self) -> Result<(), vk::Result> {
            self.calls.borrow_mut().push(Call::WaitIdle);
            if self.fail_wait {
                Err(vk::Result::ERROR_DEVICE_LOST)
            } else {
                Ok(())
            }
        }

        unsafe fn destroy(&self, object: DeviceObject) {
            self.calls.borrow_mut().push(Call::Destroy(object));
        }
    }

    fn view(raw: u64) -> DeviceObject {
        DeviceObject::ImageView(vk::ImageView::from_raw(raw))
    }

    #[test]
    fn idle_wait_precedes_first_destroy() {
        let device = RecordingDevice::default();
        let mut stack = ReleaseStack::new();
        stack.push(DeviceObject::Swapchain(vk::SwapchainKHR::from_raw(1)));
        stack.push(view(2));
        stack.push(DeviceObject::Fence(vk::Fence::from_raw(3)));

        stack.release(&device);

        let calls = device.calls.borrow();
        assert_eq!(calls[0], Call::WaitIdle);
        assert_eq!(
            calls[1..],
            [
                Call::Destroy(DeviceObject::Fence(vk::Fence::from_raw(3))),
                Call::Destroy(view(2)),
                Call::Destroy(DeviceObject::Swapchain(vk::SwapchainKHR::from_raw(1))),
            ]
        );
        assert!(stack.is_empty());
    }

    #[test]
    fn failed_idle_wait_still_destroys() {
        let device = RecordingDevice {
            fail_wait: true,
            ..Default::default()
        };
        let mut stack = ReleaseStack::new();
        stack.push(view(7));
        stack.release(&device);
        assert_eq!(*device.calls.borrow(), vec![Call::WaitIdle, Call::Destroy(view(7))]);
    }

    #[test]
    fn empty_release_touches_nothing() {
        let device = RecordingDevice::default();
        ReleaseStack::new().release(&device);
        assert!(device.calls.borrow().is_empty());
    }

    #[test]
    fn failed_build_unwinds_partial_objects() {
        let device = RecordingDevice::default();
        let result: Result<((), ReleaseStack)> = build_scoped(&device, |stack| {
            stack.push(view(1));
            stack.push(view(2));
            anyhow::bail!("third view failed")
        });

        assert!(result.is_err());
        assert_eq!(
            *device.calls.borrow(),
            vec![Call::WaitIdle, Call::Destroy(view(2)), Call::Destroy(view(1))]
        );
    }

    #[test]
    fn successful_build_hands_back_the_stack() {
        let device = RecordingDevice::default();
        let (value, mut stack) = build_scoped(&device, |stack| {
            stack.push(view(1));
            Ok(42)
        })
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(stack.len(), 1);
        assert!(device.calls.borrow().is_empty());
        stack.release(&device);
    }

    #[test]
    fn absorbed_objects_are_released_first() {
        let device = RecordingDevice::default();
        let mut early = ReleaseStack::new();
        early.push(view(1));
        let mut late = ReleaseStack::new();
        late.push(view(2));

        early.absorb(late);
        early.release(&device);

        assert_eq!(
            device.calls.borrow()[1..],
            [Call::Destroy(view(2)), Call::Destroy(view(1))]
        );
    }

    #[test]
    fn stack_alone_tears_down_pipeline_and_pool() {
        let device = RecordingDevice::default();
        let vert = DeviceObject::ShaderModule(vk::ShaderModule::from_raw(1));
        let frag = DeviceObject::ShaderModule(vk::ShaderModule::from_raw(2));
        let layout = DeviceObject::PipelineLayout(vk::PipelineLayout::from_raw(3));
        let pipeline = DeviceObject::Pipeline(vk::Pipeline::from_raw(4));
        let pool = DeviceObject::CommandPool(vk::CommandPool::from_raw(5));

        // Same push order as pipeline and command buffer setup
        let (_, mut stack) = build_scoped(&device, |stack| {
            for object in [vert, frag, layout, pipeline, pool] {
                stack.push(object);
            }
            Ok(())
        })
        .unwrap();
        stack.release(&device);

        assert_eq!(
            *device.calls.borrow(),
            vec![
                Call::WaitIdle,
                Call::Destroy(pool),
                Call::Destroy(pipeline),
                Call::Destroy(layout),
                Call::Destroy(frag),
                Call::Destroy(vert),
            ]
        );
    }
}
