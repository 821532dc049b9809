// =============================================================================
// VKFW - Minimal Vulkan application framework
// =============================================================================
//
// The crate owns everything between "I want a window" and "record your
// commands here": instance, surface, device and queues, swapchain, frames in
// flight, and the render loop. Applications implement `Application` and hand
// it to `run`.
//
// LAYOUT:
// ┌─────────────────────────────────────────────────────────────────┐
// │  application::run (winit event loop)                            │
// │    └── Context (window + Vulkan objects)                        │
// │          └── backend (instance, device, swapchain, sync, ...)   │
// │                └── your Application hooks                       │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod application;
pub mod backend;
pub mod config;
pub mod math;
pub mod model;

pub use application::{run, Application, Context};
pub use config::Settings;

use anyhow::{Context as _, Result};

/// Initialize logging from the `[debug]` section of the settings.
///
/// `RUST_LOG` still wins over the configured level. With `log_to_file` the
/// output goes to `log_file` instead of stderr.
pub fn init_logging(settings: &Settings) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(settings.debug.level_filter());
    builder.parse_default_env();

    if settings.debug.log_to_file {
        let file = std::fs::File::create(&settings.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", settings.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}
