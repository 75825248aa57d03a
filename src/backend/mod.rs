// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. The instance, surface and logical device clean up
// on Drop; everything created from the device is owned by a ReleaseStack.

pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod release;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::Swapchain;
