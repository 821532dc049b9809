// =============================================================================
// APPLICATION - Window, Vulkan context and render loop
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the fence of the current frame slot
// 2. Application::update
// 3. Acquire a swapchain image
// 4. Reset + begin the slot's command buffer
// 5. Application::record
// 6. Submit, present, advance to the next slot
//
// A resize (or an out-of-date / suboptimal swapchain) sets a flag; the
// swapchain is rebuilt at the start of the next frame and the application
// is told through `on_resize`.
//
// =============================================================================

use anyhow::{Context as _, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::backend::swapchain::choose_image_count;
use crate::backend::{
    sync, CommandPool, DeviceRequest, FramePhase, FrameRing, FrameSync, Instance,
    InstanceRequest, Queue, QueueCapabilities, Surface, Swapchain, SwapchainConfig,
    SwapchainStatus, VulkanDevice,
};
use crate::config::Settings;

/// Hooks an application plugs into the render loop.
///
/// Everything Vulkan lives in the `Context`; applications keep their own
/// pipelines and buffers and release them in `on_stop`.
pub trait Application {
    /// Called once after the window, device and swapchain exist
    fn post_initialize(&mut self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    /// Called every frame once the slot's fence has been waited on, so the
    /// slot's buffers may be written. `dt` is the time since the previous
    /// frame.
    fn update(&mut self, _ctx: &Context, _dt: Duration) {}

    /// Record this frame's commands into `cmd`. The buffer is already in the
    /// recording state; `Context::image_index` names the target image.
    fn record(&mut self, ctx: &Context, cmd: vk::CommandBuffer) -> Result<()>;

    /// The swapchain was rebuilt with a new size
    fn on_resize(&mut self, _ctx: &Context, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    /// A key other than Escape or F11 was pressed
    fn key_down(&mut self, _key: KeyCode) {}

    /// The device is idle and the context is about to be destroyed
    fn on_stop(&mut self, _ctx: &Context) {}
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Window plus every Vulkan object the render loop needs.
///
/// IMPORTANT: Field order matters for Drop! Sync objects are destroyed by
/// hand, the rest go in declaration order.
pub struct Context {
    frame_sync: Vec<FrameSync>,
    // Indexed by swapchain image
    render_finished: Vec<vk::Semaphore>,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<VulkanDevice>,
    instance: Arc<Instance>,
    window: Arc<Window>,

    settings: Settings,
    graphics_queue: Queue,
    present_queue: Queue,
    frames: FrameRing,
    phase: FramePhase,
    image_index: u32,
    acquire_status: SwapchainStatus,
    is_fullscreen: bool,
}

impl Context {
    /// Create the window and bring up Vulkan for it
    pub fn new(event_loop: &ActiveEventLoop, settings: Settings) -> Result<Self> {
        log::info!(
            "Window: {}x{} ({})",
            settings.window.width,
            settings.window.height,
            if settings.window.fullscreen { "fullscreen" } else { "windowed" }
        );

        // Step 1: Window
        let mut window_attributes = Window::default_attributes()
            .with_title(&settings.window.title)
            .with_inner_size(PhysicalSize::new(settings.window.width, settings.window.height));
        if settings.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        // Step 2: Instance + surface
        let instance = Instance::new(&InstanceRequest {
            app_name: &settings.window.title,
            app_version: settings.application.vk_version(),
            extensions: Vec::new(),
            display: Some(display_handle),
            enable_validation: settings.debug.enable_validation(),
        })?;
        let surface = Surface::new(instance.clone(), display_handle, window_handle)?;

        // Step 3: Device with a graphics and a present queue
        let device = VulkanDevice::new(
            instance.clone(),
            &DeviceRequest {
                required: QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENTATION,
                extensions: Vec::new(),
                surface: Some(&surface),
            },
        )?;
        let graphics_queue = *device.graphics_queue()?;
        let present_queue = *device.present_queue()?;

        // Step 4: Swapchain. The frame count is fixed from here on.
        let capabilities = surface.support(device.physical_device)?.capabilities;
        let frame_count = choose_image_count(settings.graphics.frames_in_flight(), &capabilities);
        log::info!("Frames in flight: {}", frame_count);

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            &SwapchainConfig {
                width: size.width,
                height: size.height,
                image_count: frame_count,
                present_mode: settings.graphics.preferred_present_mode(),
            },
            None,
        )?;

        // Step 5: Commands, one buffer per frame slot
        let command_pool = CommandPool::new(
            device.clone(),
            graphics_queue.family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate(frame_count)?;

        let is_fullscreen = settings.window.fullscreen;
        let mut context = Self {
            frame_sync: Vec::with_capacity(frame_count as usize),
            render_finished: Vec::new(),
            command_buffers,
            command_pool,
            swapchain,
            surface,
            device,
            instance,
            window,
            settings,
            graphics_queue,
            present_queue,
            frames: FrameRing::new(frame_count as usize),
            phase: FramePhase::Pending,
            image_index: 0,
            acquire_status: SwapchainStatus::Optimal,
            is_fullscreen,
        };

        // Step 6: Sync objects. Pushed one at a time so a failure still
        // cleans up through Drop.
        for _ in 0..frame_count {
            let sync = FrameSync::new(&context.device)?;
            context.frame_sync.push(sync);
        }
        let image_count = context.swapchain.image_count();
        sync::resize_semaphores(
            &context.device.device,
            &mut context.render_finished,
            image_count,
        )?;

        log::info!("Vulkan initialized successfully!");
        Ok(context)
    }

    /// Block until the GPU is done with the current slot. After this the
    /// slot's per-frame buffers may be written.
    pub fn wait_for_frame(&mut self) -> Result<()> {
        let next = self.phase.transition(FramePhase::Ready)?;
        let sync = &self.frame_sync[self.frames.current()];

        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
        }?;

        self.phase = next;
        Ok(())
    }

    /// Acquire an image and start recording. `wait_for_frame` must have run
    /// for this slot.
    ///
    /// Returns `None` when the swapchain is out of date; nothing was
    /// submitted and the caller should recreate it.
    pub fn begin_frame(&mut self) -> Result<Option<vk::CommandBuffer>> {
        let next = self.phase.transition(FramePhase::Recording)?;
        let device = &self.device.device;
        let slot = self.frames.current();
        let sync = &self.frame_sync[slot];

        let (image_index, status) = self.swapchain.acquire_next_image(sync.image_available)?;
        if status == SwapchainStatus::OutOfDate {
            return Ok(None);
        }
        self.image_index = image_index;
        self.acquire_status = status;

        // Only reset once we know work will be submitted
        let cmd = self.command_buffers[slot];
        unsafe {
            device.reset_fences(&[sync.in_flight_fence])?;
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())?;
        }

        self.phase = next;
        Ok(Some(cmd))
    }

    /// Finish recording, submit and present. Advances to the next slot.
    pub fn end_frame(&mut self, cmd: vk::CommandBuffer) -> Result<SwapchainStatus> {
        let next = self.phase.transition(FramePhase::Pending)?;
        let device = &self.device.device;
        let sync = &self.frame_sync[self.frames.current()];

        unsafe { device.end_command_buffer(cmd) }?;

        let wait_semaphores = [sync.image_available];
        let wait_stages =
            [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [self.render_finished[self.image_index as usize]];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.graphics_queue.handle,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit frame")?;
        self.phase = next;

        let mut status = self.swapchain.present(
            self.present_queue.handle,
            self.image_index,
            &signal_semaphores,
        )?;
        if status == SwapchainStatus::Optimal {
            status = self.acquire_status;
        }

        self.frames.advance();
        Ok(status)
    }

    /// Rebuild the swapchain for the current window size.
    /// Returns false (and does nothing) while the window is minimized.
    pub fn recreate_swapchain(&mut self) -> Result<bool> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(false);
        }

        self.device.wait_idle()?;

        let config = SwapchainConfig {
            width: size.width,
            height: size.height,
            image_count: self.frames.len() as u32,
            present_mode: self.settings.graphics.preferred_present_mode(),
        };
        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            &config,
            Some(&self.swapchain),
        )?;
        // Old swapchain is destroyed here
        self.swapchain = swapchain;

        // The image count may have changed; the device is idle
        let image_count = self.swapchain.image_count();
        sync::resize_semaphores(&self.device.device, &mut self.render_finished, image_count)?;

        Ok(true)
    }

    pub fn toggle_fullscreen(&mut self) {
        self.is_fullscreen = !self.is_fullscreen;

        if self.is_fullscreen {
            self.window
                .set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            self.window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    pub fn graphics_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn present_queue(&self) -> &Queue {
        &self.present_queue
    }

    /// Slot of the frame being recorded, in `0..frames_in_flight()`
    pub fn frame_index(&self) -> usize {
        self.frames.current()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Swapchain image acquired for the frame being recorded
    pub fn image_index(&self) -> u32 {
        self.image_index
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        for sync in self.frame_sync.drain(..) {
            sync.destroy(&self.device.device);
        }
        for semaphore in self.render_finished.drain(..) {
            unsafe { self.device.device.destroy_semaphore(semaphore, None) };
        }
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Counts frames and reports the rate roughly once per second
#[derive(Debug, Clone, Copy)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    /// Count one frame; returns frames per second once a second has passed
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;

        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

struct Runner<A: Application> {
    settings: Settings,
    app: A,
    context: Option<Context>,
    error: Option<anyhow::Error>,
    needs_resize: bool,
    is_minimized: bool,
    fps: FpsCounter,
    last_frame: Instant,
}

impl<A: Application> Runner<A> {
    fn new(settings: Settings, app: A) -> Self {
        let now = Instant::now();
        Self {
            settings,
            app,
            context: None,
            error: None,
            needs_resize: false,
            is_minimized: false,
            fps: FpsCounter::new(now),
            last_frame: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn draw_frame(&mut self) -> Result<()> {
        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };

        if self.needs_resize {
            if !ctx.recreate_swapchain()? {
                self.is_minimized = true;
                return Ok(());
            }
            self.needs_resize = false;
            let extent = ctx.extent();
            self.app.on_resize(ctx, extent.width, extent.height)?;
        }

        ctx.wait_for_frame()?;

        let now = Instant::now();
        self.app.update(ctx, now.duration_since(self.last_frame));
        self.last_frame = now;

        let Some(cmd) = ctx.begin_frame()? else {
            self.needs_resize = true;
            return Ok(());
        };
        self.app.record(ctx, cmd)?;

        if ctx.end_frame(cmd)?.needs_recreation() {
            self.needs_resize = true;
        }

        if let Some(fps) = self.fps.tick(now) {
            if ctx.settings().debug.show_fps {
                ctx.window()
                    .set_title(&format!("{} - {:.0} FPS", ctx.settings().window.title, fps));
            }
        }

        Ok(())
    }

    /// Idle the device, let the application release its resources and tear
    /// the context down
    fn shutdown(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.device().wait_idle() {
                log::warn!("wait_idle failed during shutdown: {:?}", e);
            }
            self.app.on_stop(&ctx);
            drop(ctx);
            log::info!("Cleanup complete");
        }
    }
}

impl<A: Application> ApplicationHandler for Runner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.context.is_some() {
            return;
        }

        let ctx = match Context::new(event_loop, self.settings.clone()) {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(event_loop, e.context("Failed to initialize Vulkan")),
        };

        let result = self.app.post_initialize(&ctx);
        self.context = Some(ctx);
        if let Err(e) = result {
            self.fail(event_loop, e.context("Application failed to initialize"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if self.is_minimized {
                    return;
                }
                if let Err(e) = self.draw_frame() {
                    self.fail(event_loop, e.context("Render error"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                match key {
                    KeyCode::Escape => {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                    KeyCode::F11 => {
                        if let Some(ctx) = self.context.as_mut() {
                            ctx.toggle_fullscreen();
                            self.needs_resize = true;
                        }
                    }
                    other => self.app.key_down(other),
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ctx) = &self.context {
            ctx.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Open a window, bring up Vulkan and drive `app` until the window closes
/// or Escape is pressed.
///
/// Errors from initialization or from any frame end the loop and are
/// returned here.
pub fn run<A: Application>(settings: Settings, app: A) -> Result<()> {
    settings.validate()?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut runner = Runner::new(settings, app);
    event_loop.run_app(&mut runner)?;

    runner.shutdown();
    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reported_after_one_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for i in 1..60 {
            assert_eq!(fps.tick(start + Duration::from_millis(i * 16)), None);
        }
        let rate = fps.tick(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 30.0).abs() < 1e-3);
    }

    #[test]
    fn fps_window_restarts_after_report() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        assert!(fps.tick(start + Duration::from_secs(1)).is_some());
        assert_eq!(fps.tick(start + Duration::from_millis(1500)), None);
        let rate = fps.tick(start + Duration::from_secs(2)).unwrap();
        assert!((rate - 2.0).abs() < 1e-3);
    }
}
