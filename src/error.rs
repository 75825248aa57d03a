// Renderer error taxonomy
//
// Setup code works with anyhow::Result like the rest of the crate, but every
// failure that the entry point has to classify is raised as a RendererError so
// it can be downcast and mapped to a category.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure category, used for the single diagnostic line printed on exit.
/// Everything but FrameTransient ends the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The machine cannot run us at all: no display, no loader, no GPU.
    Environment,
    /// A GPU exists but lacks something we require.
    Capability,
    /// A Vulkan object could not be created during startup.
    ResourceCreation,
    /// A steady-state frame failed. Logged and skipped.
    FrameTransient,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Environment => "environment",
            ErrorKind::Capability => "capability",
            ErrorKind::ResourceCreation => "resource creation",
            ErrorKind::FrameTransient => "frame",
        }
    }
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to connect to a Wayland display: {0}")]
    NoDisplay(String),

    #[error("failed to load the Vulkan library: {0}")]
    LoaderUnavailable(String),

    #[error("window system is not Wayland, cannot create a surface")]
    UnsupportedWindowSystem,

    #[error("no usable Vulkan driver: {0}")]
    NoDriver(vk::Result),

    #[error("failed to find GPUs with Vulkan support")]
    NoAdapters,

    #[error("failed to find a suitable GPU ({candidates} candidates rejected)")]
    NoSuitableAdapter { candidates: usize },

    #[error("validation layers requested, but not available")]
    ValidationLayersUnavailable,

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed: {result}")]
    FrameTransient {
        step: &'static str,
        result: vk::Result,
    },

    #[error("image index {index} out of range ({count} framebuffers)")]
    ImageIndexOutOfRange { index: u32, count: usize },
}

impl RendererError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RendererError::NoDisplay(_)
            | RendererError::LoaderUnavailable(_)
            | RendererError::UnsupportedWindowSystem
            | RendererError::NoDriver(_)
            | RendererError::NoAdapters => ErrorKind::Environment,
            RendererError::NoSuitableAdapter { .. }
            | RendererError::ValidationLayersUnavailable
            | RendererError::NoSurfaceFormats => ErrorKind::Capability,
            RendererError::ResourceCreation { .. } | RendererError::ShaderLoad { .. } => {
                ErrorKind::ResourceCreation
            }
            RendererError::FrameTransient { .. } | RendererError::ImageIndexOutOfRange { .. } => {
                ErrorKind::FrameTransient
            }
        }
    }

    /// Adapter for `map_err` on Vulkan create calls.
    pub fn creating(what: &'static str) -> impl FnOnce(vk::Result) -> RendererError {
        move |result| RendererError::ResourceCreation { what, result }
    }

    /// Like `creating`, for the first calls that reach the driver. Those report
    /// a missing or incompatible driver as a failed initialisation.
    pub fn driver(what: &'static str) -> impl FnOnce(vk::Result) -> RendererError {
        move |result| match result {
            vk::Result::ERROR_INCOMPATIBLE_DRIVER | vk::Result::ERROR_INITIALIZATION_FAILED => {
                RendererError::NoDriver(result)
            }
            result => RendererError::ResourceCreation { what, result },
        }
    }

    /// Adapter for `map_err` on per-frame Vulkan calls.
    pub fn frame(step: &'static str) -> impl FnOnce(vk::Result) -> RendererError {
        move |result| RendererError::FrameTransient { step, result }
    }
}

/// Find the category of an arbitrary startup error. Anything that never went
/// through RendererError is treated as a resource creation failure.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RendererError>())
        .map(RendererError::kind)
        .unwrap_or(ErrorKind::ResourceCreation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn adapter_failures_are_distinct_categories() {
        assert_eq!(RendererError::NoAdapters.kind(), ErrorKind::Environment);
        assert_eq!(
            RendererError::NoSuitableAdapter { candidates: 2 }.kind(),
            ErrorKind::Capability
        );
    }

    #[test]
    fn device_creation_is_not_a_selection_failure() {
        let err = RendererError::creating("logical device")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert_eq!(err.kind(), ErrorKind::ResourceCreation);
        assert!(err.to_string().contains("logical device"));
    }

    #[test]
    fn frame_errors_have_their_own_category() {
        let frame = RendererError::frame("queue submit")(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(frame.kind(), ErrorKind::FrameTransient);
        assert_eq!(frame.kind().label(), "frame");
    }

    #[test]
    fn missing_driver_is_an_environment_error() {
        for result in [
            vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            vk::Result::ERROR_INITIALIZATION_FAILED,
        ] {
            let err = RendererError::driver("Vulkan instance")(result);
            assert!(matches!(err, RendererError::NoDriver(r) if r == result));
            assert_eq!(err.kind(), ErrorKind::Environment);
        }

        let oom = RendererError::driver("physical device list")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(oom.kind(), ErrorKind::ResourceCreation);
        assert!(oom.to_string().contains("physical device list"));
    }

    #[test]
    fn classify_reports_missing_driver_as_environment() {
        let err: anyhow::Error =
            RendererError::driver("Vulkan instance")(vk::Result::ERROR_INCOMPATIBLE_DRIVER).into();
        assert_eq!(classify(&err), ErrorKind::Environment);
        assert_eq!(classify(&err).label(), "environment");
    }

    #[test]
    fn classify_sees_through_context() {
        let err = Err::<(), _>(RendererError::ValidationLayersUnavailable)
            .context("creating instance")
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Capability);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(classify(&plain), ErrorKind::ResourceCreation);
    }
}
