// =============================================================================
// TRI-RENDERER - one Vulkan triangle in a Wayland window
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (Wayland)                                     │
// │    └── Renderer                                                 │
// │          └── Instance -> Surface -> Device                      │
// │                └── Swapchain, render pass, pipeline             │
// │                      └── Command buffer + sync objects          │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the previous frame's fence
// 2. Acquire swapchain image
// 3. Record the draw for that image
// 4. Submit
// 5. Present
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;

use anyhow::{Context, Result};
use ash::vk;
use config::Config;
use error::{classify, RendererError};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use renderer::Renderer;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    if let Err(e) = run() {
        eprintln!("fatal {} error: {:#}", classify(&e).label(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Shaders and config.toml are looked up next to the binary
    let chdir_warning = enter_executable_dir().err();

    let (config, config_warning) = Config::load();

    init_logging(&config);
    if let Some(e) = chdir_warning {
        log::warn!("Staying in current directory: {:#}", e);
    }
    if let Some(message) = config_warning {
        log::warn!("{}", message);
    }

    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}",
        config.window.width,
        config.window.height
    );

    let event_loop = create_event_loop()?;
    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .map_err(|e| RendererError::NoDisplay(e.to_string()))?;

    app.finish()
}

fn enter_executable_dir() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate executable")?;
    let dir = exe
        .parent()
        .context("Executable path has no parent directory")?;
    std::env::set_current_dir(dir)
        .with_context(|| format!("Failed to change directory to {:?}", dir))?;
    Ok(())
}

/// Default filter comes from config.toml; RUST_LOG wins when set
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_env(Env::default());
    builder.init();
}

#[cfg(target_os = "linux")]
fn create_event_loop() -> Result<EventLoop<()>> {
    use winit::platform::wayland::EventLoopBuilderExtWayland;

    let event_loop = EventLoop::builder()
        .with_wayland()
        .build()
        .map_err(|e| RendererError::NoDisplay(e.to_string()))?;
    Ok(event_loop)
}

#[cfg(not(target_os = "linux"))]
fn create_event_loop() -> Result<EventLoop<()>> {
    Err(RendererError::UnsupportedWindowSystem.into())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: `renderer` is declared before `window` so the Vulkan surface is
/// gone before the Wayland surface it points at.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    /// First fatal error; reported once the event loop has returned
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            failure: None,
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let display_handle = window
            .display_handle()
            .map_err(|e| RendererError::NoDisplay(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RendererError::NoDisplay(e.to_string()))?
            .as_raw();

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        // The window is kept alive in `self.window` for as long as the renderer
        unsafe { Renderer::new(&self.config, display_handle, window_handle, extent) }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        event_loop.exit();
    }

    /// Tear everything down and hand back the first fatal error, if any
    fn finish(&mut self) -> Result<()> {
        if let Some(renderer) = self.renderer.take() {
            let stats = renderer.stats();
            log::info!(
                "Shutting down after {} frames presented ({} stale, {} dropped)",
                stats.presented,
                stats.stale,
                stats.dropped
            );
        }
        self.window = None;

        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, RendererError::NoDisplay(e.to_string()).into());
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                log::info!(
                    "Renderer ready with {} swapchain images",
                    renderer.image_count()
                );
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.draw_frame();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape | KeyCode::KeyQ) = event.physical_key {
                        log::info!("Quit key pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            // Swapchain is sized once at startup
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }

            _ => {}
        }
    }

    /// Redraw continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    #[test]
    fn build_output_lands_next_to_the_binary() {
        let runtime_dir = Path::new(env!("TRI_RENDERER_RUNTIME_DIR"));

        // Test binaries sit one level down, in target/<profile>/deps/
        let test_exe = std::env::current_exe().unwrap();
        let profile_dir = test_exe.parent().and_then(Path::parent).unwrap();

        assert_eq!(
            runtime_dir.canonicalize().unwrap(),
            profile_dir.canonicalize().unwrap()
        );
        assert!(runtime_dir.join("config.toml").is_file());
        assert!(runtime_dir.join("shaders").is_dir());
    }

    #[test]
    fn shipped_config_parses() {
        let config = crate::Config::load_from_path(
            Path::new(env!("TRI_RENDERER_RUNTIME_DIR")).join("config.toml"),
        )
        .unwrap();
        assert_eq!(config.shaders.vertex, Path::new("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, Path::new("shaders/frag.spv"));
    }
}
