// OBJ viewer: depth-tested Lambert shading, arrow keys move the camera

use anyhow::{Context as _, Result};
use ash::vk;
use clap::Parser;
use gpu_allocator::MemoryLocation;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use winit::keyboard::KeyCode;

use vkfw::backend::{pipeline, shader, Buffer, Image, VulkanDevice};
use vkfw::math::{perspective, Camera, SceneConstants};
use vkfw::model::{self, Model, Vertex};
use vkfw::{Application, Context, Settings};

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const FOV_Y_DEGREES: f32 = 60.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 100.0;

#[derive(Parser, Debug)]
#[command(name = "obj_loader", about = "Render a Wavefront OBJ model")]
struct Args {
    /// Path to the .obj file
    model: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

fn manifest_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

/// Debug builds fall back to the cube shipped with the crate
fn model_path(arg: Option<PathBuf>) -> Result<PathBuf> {
    match arg {
        Some(path) => Ok(path),
        None if cfg!(debug_assertions) => Ok(manifest_path("models/cube.obj")),
        None => anyhow::bail!("usage: obj_loader <path to obj>"),
    }
}

/// Per-swapchain-image depth buffers and framebuffers, rebuilt on resize
#[derive(Default)]
struct RenderTargets {
    framebuffers: Vec<vk::Framebuffer>,
    depth_images: Vec<Image>,
}

impl RenderTargets {
    fn new(ctx: &Context, render_pass: vk::RenderPass) -> Result<Self> {
        let extent = ctx.extent();
        let depth_images = (0..ctx.swapchain().image_count())
            .map(|_| Image::depth(ctx.device().clone(), extent, DEPTH_FORMAT))
            .collect::<Result<Vec<_>>>()?;
        let depth_views: Vec<vk::ImageView> = depth_images.iter().map(|image| image.view).collect();

        let framebuffers = pipeline::create_framebuffers(
            ctx.device(),
            render_pass,
            &ctx.swapchain().image_views,
            Some(&depth_views),
            extent,
        )?;

        Ok(Self {
            framebuffers,
            depth_images,
        })
    }

    fn destroy(&mut self, device: &VulkanDevice) {
        pipeline::destroy_framebuffers(device, &mut self.framebuffers);
        self.depth_images.clear();
    }
}

/// GPU state, created in post_initialize. Null handles until built.
#[derive(Default)]
struct Scene {
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniform_buffers: Vec<Buffer>,
    targets: RenderTargets,
    model: Model,
}

impl Scene {
    fn new(ctx: &Context, meshes: &[model::MeshData]) -> Result<Self> {
        let mut scene = Self::default();
        match scene.build(ctx, meshes) {
            Ok(()) => Ok(scene),
            Err(e) => {
                // Destroying a null handle is a no-op
                scene.destroy(ctx.device());
                Err(e)
            }
        }
    }

    /// Stores each handle as soon as it exists so `destroy` can release a
    /// partly built scene
    fn build(&mut self, ctx: &Context, meshes: &[model::MeshData]) -> Result<()> {
        let device = ctx.device();

        self.render_pass =
            pipeline::create_render_pass(device, ctx.swapchain().format.format, Some(DEPTH_FORMAT))?;
        self.set_layout = pipeline::create_uniform_set_layout(device)?;

        let vertex_shader =
            shader::load_shader_module(device, manifest_path("shaders/lambert.vert.spv"))?;
        let fragment_shader =
            shader::load_shader_module(device, manifest_path("shaders/lambert.frag.spv"));
        let created = fragment_shader.and_then(|fragment_shader| {
            let created = pipeline::create_graphics_pipeline(
                device,
                self.render_pass,
                &pipeline::GraphicsPipelineDesc {
                    vertex_shader,
                    fragment_shader,
                    vertex_bindings: &Vertex::binding_descriptions(),
                    vertex_attributes: &Vertex::attribute_descriptions(),
                    set_layouts: &[self.set_layout],
                    depth_test: true,
                    cull_mode: vk::CullModeFlags::BACK,
                    front_face: vk::FrontFace::CLOCKWISE,
                },
            );
            unsafe { device.device.destroy_shader_module(fragment_shader, None) };
            created
        });
        unsafe { device.device.destroy_shader_module(vertex_shader, None) };
        (self.pipeline, self.pipeline_layout) = created?;

        // One uniform buffer and descriptor set per frame in flight
        let frames = ctx.frames_in_flight();
        let uniform_size = std::mem::size_of::<SceneConstants>() as vk::DeviceSize;
        for i in 0..frames {
            self.uniform_buffers.push(Buffer::new(
                device.clone(),
                &format!("scene constants {i}"),
                uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?);
        }

        self.descriptor_pool = pipeline::create_descriptor_pool(device, frames as u32)?;
        let handles: Vec<vk::Buffer> = self.uniform_buffers.iter().map(|b| b.handle).collect();
        self.descriptor_sets = pipeline::allocate_uniform_sets(
            device,
            self.descriptor_pool,
            self.set_layout,
            &handles,
            uniform_size,
        )?;

        self.model = Model::upload(
            device,
            ctx.command_pool(),
            ctx.graphics_queue().handle,
            meshes,
        )?;

        self.targets = RenderTargets::new(ctx, self.render_pass)?;
        Ok(())
    }

    fn destroy(mut self, device: &Arc<VulkanDevice>) {
        self.targets.destroy(device);
        unsafe {
            device.device.destroy_pipeline(self.pipeline, None);
            device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.device.destroy_descriptor_set_layout(self.set_layout, None);
            device.device.destroy_render_pass(self.render_pass, None);
        }
        // Buffers and the model free themselves
    }
}

struct ObjLoader {
    meshes: Vec<model::MeshData>,
    camera: Camera,
    scene: Option<Scene>,
}

impl Application for ObjLoader {
    fn post_initialize(&mut self, ctx: &Context) -> Result<()> {
        self.scene = Some(Scene::new(ctx, &self.meshes)?);
        // CPU copies are no longer needed once uploaded
        self.meshes = Vec::new();
        Ok(())
    }

    fn record(&mut self, ctx: &Context, cmd: vk::CommandBuffer) -> Result<()> {
        let scene = self.scene.as_mut().context("Scene not initialized")?;
        let device = &ctx.device().device;
        let extent = ctx.extent();
        let frame = ctx.frame_index();

        let constants = SceneConstants {
            view: self.camera.view(),
            projection: perspective(
                FOV_Y_DEGREES,
                extent.width as f32 / extent.height.max(1) as f32,
                Z_NEAR,
                Z_FAR,
            ),
        };
        scene.uniform_buffers[frame].write(std::slice::from_ref(&constants))?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: ctx.settings().graphics.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        pipeline::begin_render_pass(
            device,
            cmd,
            scene.render_pass,
            scene.targets.framebuffers[ctx.image_index() as usize],
            extent,
            &clear_values,
        );
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, scene.pipeline);
            pipeline::set_viewport_and_scissor(device, cmd, extent);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                scene.pipeline_layout,
                0,
                &[scene.descriptor_sets[frame]],
                &[],
            );
        }
        scene.model.draw(device, cmd);
        unsafe { device.cmd_end_render_pass(cmd) };

        Ok(())
    }

    fn on_resize(&mut self, ctx: &Context, width: u32, height: u32) -> Result<()> {
        log::debug!("Rebuilding render targets for {}x{}", width, height);
        let scene = self.scene.as_mut().context("Scene not initialized")?;
        scene.targets.destroy(ctx.device());
        scene.targets = RenderTargets::new(ctx, scene.render_pass)?;
        Ok(())
    }

    fn key_down(&mut self, key: KeyCode) {
        if self.camera.nudge(key) {
            log::trace!("Camera at {:?}", self.camera.position);
        }
    }

    fn on_stop(&mut self, ctx: &Context) {
        if let Some(scene) = self.scene.take() {
            scene.destroy(ctx.device());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (mut settings, fallback) = Settings::load_or_default(&args.config);
    if settings.window.title == Settings::default().window.title {
        settings.window.title = "obj_loader".to_string();
    }

    vkfw::init_logging(&settings)?;
    Settings::report_fallback(fallback.as_ref());

    let path = model_path(args.model)?;
    let meshes = model::load_obj(&path)?;

    vkfw::run(
        settings,
        ObjLoader {
            meshes,
            camera: Camera::default(),
            scene: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_model_path_wins() {
        let path = model_path(Some(PathBuf::from("teapot.obj"))).unwrap();
        assert_eq!(path, PathBuf::from("teapot.obj"));
    }

    #[test]
    fn default_model_depends_on_build() {
        let result = model_path(None);
        if cfg!(debug_assertions) {
            assert!(result.unwrap().ends_with("models/cube.obj"));
        } else {
            assert!(result.is_err());
        }
    }

    #[test]
    fn unbuilt_scene_holds_only_null_handles() {
        let scene = Scene::default();
        assert_eq!(scene.render_pass, vk::RenderPass::null());
        assert_eq!(scene.set_layout, vk::DescriptorSetLayout::null());
        assert_eq!(scene.pipeline, vk::Pipeline::null());
        assert_eq!(scene.pipeline_layout, vk::PipelineLayout::null());
        assert_eq!(scene.descriptor_pool, vk::DescriptorPool::null());
        assert!(scene.uniform_buffers.is_empty());
        assert!(scene.targets.framebuffers.is_empty());
        assert!(scene.model.meshes.is_empty());
    }

    #[test]
    fn args_parse_positional_model() {
        let args = Args::parse_from(["obj_loader", "bunny.obj", "--config", "alt.toml"]);
        assert_eq!(args.model, Some(PathBuf::from("bunny.obj")));
        assert_eq!(args.config, PathBuf::from("alt.toml"));
    }
}
