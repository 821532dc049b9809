// Hello triangle: a colour-only render pass and three hard-coded vertices

use anyhow::Result;
use ash::vk;
use std::path::{Path, PathBuf};
use vkfw::backend::{pipeline, shader};
use vkfw::{Application, Context, Settings};

fn shader_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders").join(name)
}

#[derive(Default)]
struct Triangle {
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Triangle {
    fn create_framebuffers(&mut self, ctx: &Context) -> Result<()> {
        pipeline::destroy_framebuffers(ctx.device(), &mut self.framebuffers);
        self.framebuffers = pipeline::create_framebuffers(
            ctx.device(),
            self.render_pass,
            &ctx.swapchain().image_views,
            None,
            ctx.extent(),
        )?;
        Ok(())
    }
}

impl Application for Triangle {
    fn post_initialize(&mut self, ctx: &Context) -> Result<()> {
        let device = ctx.device();

        self.render_pass =
            pipeline::create_render_pass(device, ctx.swapchain().format.format, None)?;

        let vertex_shader = shader::load_shader_module(device, shader_path("triangle.vert.spv"))?;
        let fragment_shader =
            match shader::load_shader_module(device, shader_path("triangle.frag.spv")) {
                Ok(module) => module,
                Err(e) => {
                    unsafe { device.device.destroy_shader_module(vertex_shader, None) };
                    return Err(e);
                }
            };

        let created = pipeline::create_graphics_pipeline(
            device,
            self.render_pass,
            &pipeline::GraphicsPipelineDesc {
                vertex_shader,
                fragment_shader,
                vertex_bindings: &[],
                vertex_attributes: &[],
                set_layouts: &[],
                depth_test: false,
                cull_mode: vk::CullModeFlags::NONE,
                front_face: vk::FrontFace::CLOCKWISE,
            },
        );

        // Modules are baked into the pipeline
        unsafe {
            device.device.destroy_shader_module(vertex_shader, None);
            device.device.destroy_shader_module(fragment_shader, None);
        }

        (self.pipeline, self.pipeline_layout) = created?;
        self.create_framebuffers(ctx)
    }

    fn record(&mut self, ctx: &Context, cmd: vk::CommandBuffer) -> Result<()> {
        let device = &ctx.device().device;
        let extent = ctx.extent();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: ctx.settings().graphics.clear_color,
            },
        }];

        pipeline::begin_render_pass(
            device,
            cmd,
            self.render_pass,
            self.framebuffers[ctx.image_index() as usize],
            extent,
            &clear_values,
        );
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            pipeline::set_viewport_and_scissor(device, cmd, extent);
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
        }
        Ok(())
    }

    fn on_resize(&mut self, ctx: &Context, _width: u32, _height: u32) -> Result<()> {
        self.create_framebuffers(ctx)
    }

    fn on_stop(&mut self, ctx: &Context) {
        let device = ctx.device();
        pipeline::destroy_framebuffers(device, &mut self.framebuffers);
        unsafe {
            device.device.destroy_pipeline(self.pipeline, None);
            device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn main() -> Result<()> {
    let (mut settings, fallback) = Settings::load();
    if settings.window.title == Settings::default().window.title {
        settings.window.title = "triangle".to_string();
    }

    vkfw::init_logging(&settings)?;
    Settings::report_fallback(fallback.as_ref());
    log::info!("Starting triangle sample");

    vkfw::run(settings, Triangle::default())
}
