//! Graphics pipeline assembly
//!
//! [`PipelineBuilder`] collects shader stages, vertex input, topology and an
//! optional descriptor set layout and pool, then compiles them against a
//! render pass in [`PipelineBuilder::finalize`]. A compiled pipeline is tied
//! to that render pass object, so `finalize` must run again after every
//! render target rebuild. Calling it again replaces the previous pipeline.

use std::ffi::CStr;

use ash::{vk, Device};

use crate::render::vulkan::{
    ActiveRenderPass, DescriptorPool, DescriptorSetLayout, RenderTarget, ShaderModule, ShaderStore,
    Swapchain, VulkanError, VulkanResult,
};

fn entry_point() -> &'static CStr {
    // SAFETY: literal is NUL-terminated with no interior NUL
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") }
}

/// Viewport covering `extent` with the full depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

struct ShaderStage {
    stage: vk::ShaderStageFlags,
    name: String,
    module: ShaderModule,
}

struct CompiledPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
}

impl Drop for CompiledPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Builder and owner of one graphics pipeline
pub struct PipelineBuilder {
    // Dropped before the descriptor layout its pipeline layout references
    compiled: Option<CompiledPipeline>,
    descriptor_pool: Option<DescriptorPool>,
    descriptor_layout: Option<DescriptorSetLayout>,
    device: Device,
    stages: Vec<ShaderStage>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    dynamic_viewport_scissor: bool,
}

impl PipelineBuilder {
    /// Empty builder: triangle lists, no stages, static viewport
    pub fn new(device: Device) -> Self {
        Self {
            compiled: None,
            descriptor_pool: None,
            descriptor_layout: None,
            device,
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            dynamic_viewport_scissor: false,
        }
    }

    /// Load `name` from the shader store and append it as a stage with
    /// entry point `main`
    pub fn add_shader(
        &mut self,
        shaders: &dyn ShaderStore,
        stage: vk::ShaderStageFlags,
        name: &str,
    ) -> VulkanResult<&mut Self> {
        let bytecode = shaders.load(name)?;
        let module = ShaderModule::from_bytes(self.device.clone(), &bytecode)?;
        log::debug!("Added {stage:?} shader '{name}' ({} bytes)", bytecode.len());
        self.stages.push(ShaderStage {
            stage,
            name: name.to_string(),
            module,
        });
        Ok(self)
    }

    /// Vertex buffer bindings and attribute layout
    pub fn set_vertex_input(
        &mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> &mut Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    /// Primitive topology
    pub fn set_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.topology = topology;
        self
    }

    /// Make viewport and scissor dynamic so they are set while recording
    /// instead of baked from the swapchain extent
    pub fn set_dynamic_viewport_scissor(&mut self, dynamic: bool) -> &mut Self {
        self.dynamic_viewport_scissor = dynamic;
        self
    }

    /// Create the descriptor set layout used by the pipeline layout
    pub fn set_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<&mut Self> {
        self.descriptor_pool = None;
        self.descriptor_layout = Some(DescriptorSetLayout::new(self.device.clone(), bindings)?);
        Ok(self)
    }

    /// Create the pool [`Self::get_sets`] allocates from
    pub fn create_descriptor_pool(
        &mut self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<&mut Self> {
        self.descriptor_pool = Some(DescriptorPool::new(self.device.clone(), pool_sizes, max_sets)?);
        Ok(self)
    }

    /// Compile against the render target's current render pass, replacing
    /// any previously compiled pipeline
    pub fn finalize(&mut self, render_target: &RenderTarget, swapchain: &Swapchain) -> VulkanResult<()> {
        if self.stages.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "pipeline has no shader stages".to_string(),
            });
        }
        let render_pass = render_target.render_pass();
        if render_pass == vk::RenderPass::null() {
            return Err(VulkanError::InvalidOperation {
                reason: "render target has no render pass".to_string(),
            });
        }

        self.compiled = None;

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module.handle())
                    .name(entry_point())
                    .build()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewports = [full_viewport(swapchain.extent())];
        let scissors = [full_scissor(swapchain.extent())];
        let viewport_state = if self.dynamic_viewport_scissor {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewport_count(1)
                .scissor_count(1)
        } else {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewports(&viewports)
                .scissors(&scissors)
        };

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = if self.dynamic_viewport_scissor {
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        } else {
            Vec::new()
        };
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            self.descriptor_layout.iter().map(DescriptorSetLayout::handle).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe {
            self.device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_index(-1);

        let created = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match created.map(|pipelines| pipelines.into_iter().next()) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::InvalidOperation {
                    reason: "driver returned no pipeline".to_string(),
                });
            }
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(e));
            }
        };

        log::debug!(
            "Compiled pipeline [{}] for render pass {:?}",
            self.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", "),
            render_pass
        );
        self.compiled = Some(CompiledPipeline {
            device: self.device.clone(),
            pipeline,
            layout,
            render_pass,
        });
        Ok(())
    }

    /// Allocate `count` descriptor sets with the pipeline's set layout
    pub fn get_sets(&self, count: u32) -> VulkanResult<Vec<vk::DescriptorSet>> {
        match (&self.descriptor_pool, &self.descriptor_layout) {
            (Some(pool), Some(_)) if count > pool.max_sets() => Err(VulkanError::InvalidOperation {
                reason: format!("{count} descriptor sets requested from a pool of {}", pool.max_sets()),
            }),
            (Some(pool), Some(layout)) => pool.allocate(layout.handle(), count),
            _ => Err(VulkanError::InvalidOperation {
                reason: "descriptor set layout and pool must be created first".to_string(),
            }),
        }
    }

    /// Bind the compiled pipeline inside a render pass
    pub fn bind(&self, pass: &ActiveRenderPass<'_>) {
        pass.bind_pipeline(self.handle());
    }

    /// Bind descriptor sets starting at set 0
    pub fn bind_descriptor_sets(&self, pass: &ActiveRenderPass<'_>, sets: &[vk::DescriptorSet]) {
        pass.bind_descriptor_sets(self.layout(), 0, sets);
    }

    /// Compiled pipeline; null before `finalize`
    pub fn handle(&self) -> vk::Pipeline {
        self.compiled
            .as_ref()
            .map_or_else(vk::Pipeline::null, |c| c.pipeline)
    }

    /// Pipeline layout; null before `finalize`
    pub fn layout(&self) -> vk::PipelineLayout {
        self.compiled
            .as_ref()
            .map_or_else(vk::PipelineLayout::null, |c| c.layout)
    }

    /// Render pass the pipeline was compiled against
    pub fn render_pass(&self) -> vk::RenderPass {
        self.compiled
            .as_ref()
            .map_or_else(vk::RenderPass::null, |c| c.render_pass)
    }

    /// Whether viewport and scissor must be set while recording
    pub const fn has_dynamic_viewport_scissor(&self) -> bool {
        self.dynamic_viewport_scissor
    }

    /// Number of shader stages added
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
