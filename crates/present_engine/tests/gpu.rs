//! Device-backed tests. They need a Vulkan driver and a display, so they
//! are ignored by default: `cargo test -- --ignored`.

use ash::vk;
use present_engine::prelude::*;
use present_engine::render::vulkan::Buffer;

fn test_config() -> RendererConfig {
    RendererConfig::default().with_device_requirements(DeviceRequirements {
        require_discrete_gpu: false,
        require_geometry_shader: false,
        require_vertex_pipeline_stores_and_atomics: false,
    })
}

fn shader_store() -> FileShaderStore {
    FileShaderStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../target/shaders"))
}

fn setup() -> (Window, DeviceContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut window = Window::new("present_engine test", 320, 240).unwrap();
    let context = DeviceContext::new(&mut window, &test_config()).unwrap();
    (window, context)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_buffer_memory_has_requested_flags() {
    let (_window, context) = setup();
    let requested = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let buffer = Buffer::new(&context, 256, vk::BufferUsageFlags::TRANSFER_SRC, requested).unwrap();

    assert!(buffer.memory_properties().contains(requested));
    assert_eq!(buffer.size(), 256);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_zero_sized_buffer_is_rejected() {
    let (_window, context) = setup();
    let result = Buffer::new(
        &context,
        0,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    );
    assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_device_local_memory_cannot_be_mapped() {
    let (_window, context) = setup();
    let buffer = Buffer::new(
        &context,
        64,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    if !buffer
        .memory_properties()
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    {
        assert!(buffer.map().is_err());
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_staging_upload_round_trips() {
    let (_window, context) = setup();

    for len in [1usize, 12, 4096, 3 * 1024 * 1024] {
        let data = pattern(len);
        let local = Buffer::new_local_with_data(&context, vk::BufferUsageFlags::TRANSFER_SRC, &data).unwrap();
        assert!(local
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));

        let readback = Buffer::new(
            &context,
            len as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        local
            .copy_to_buffer(&context, &readback, len as vk::DeviceSize)
            .unwrap();

        let mut out = vec![0u8; len];
        readback.copy_to_host(&mut out).unwrap();
        assert_eq!(out, data, "mismatch for {len} byte upload");
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_copy_larger_than_destination_fails() {
    let (_window, context) = setup();
    let props = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let src = Buffer::new(&context, 128, vk::BufferUsageFlags::TRANSFER_SRC, props).unwrap();
    let dst = Buffer::new(&context, 64, vk::BufferUsageFlags::TRANSFER_DST, props).unwrap();
    assert!(src.copy_to_buffer(&context, &dst, 128).is_err());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_descriptor_sets_come_from_configured_pool() {
    let (_window, context) = setup();
    let mut pipeline = PipelineBuilder::new(context.device().clone());

    assert!(matches!(pipeline.get_sets(1), Err(VulkanError::InvalidOperation { .. })));

    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build();
    pipeline.set_descriptor_set_layout(&[binding]).unwrap();
    assert!(matches!(pipeline.get_sets(1), Err(VulkanError::InvalidOperation { .. })));

    let pool_size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 3,
    };
    pipeline.create_descriptor_pool(&[pool_size], 3).unwrap();

    let sets = pipeline.get_sets(3).unwrap();
    assert_eq!(sets.len(), 3);
    assert!(sets.iter().all(|&set| set != vk::DescriptorSet::null()));
    assert!(matches!(pipeline.get_sets(4), Err(VulkanError::InvalidOperation { .. })));
}

struct Triangle {
    vertices: Buffer,
}

impl FrameContent for Triangle {
    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder, shaders: &dyn ShaderStore) -> VulkanResult<()> {
        pipeline
            .add_shader(shaders, vk::ShaderStageFlags::VERTEX, "passthrough")?
            .add_shader(shaders, vk::ShaderStageFlags::FRAGMENT, "red")?
            .set_vertex_input(
                &[vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: 12,
                    input_rate: vk::VertexInputRate::VERTEX,
                }],
                &[vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                }],
            );
        Ok(())
    }

    fn record(&self, pass: &ActiveRenderPass<'_>) {
        pass.bind_vertex_buffers(0, &[self.vertices.handle()], &[0]);
        pass.draw(3, 1, 0, 0);
    }
}

fn triangle(context: &DeviceContext) -> Triangle {
    let positions: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    let bytes: Vec<u8> = positions.iter().flat_map(|p| p.to_ne_bytes()).collect();
    Triangle {
        vertices: Buffer::new_local_with_data(context, vk::BufferUsageFlags::VERTEX_BUFFER, &bytes).unwrap(),
    }
}

#[test]
#[ignore = "requires a Vulkan device and a display"]
fn test_frames_present_and_rotate_slots() {
    let (window, context) = setup();
    let config = test_config();
    let mut renderer =
        FrameRenderer::new(&context, &window, &shader_store(), triangle(&context), &config).unwrap();

    assert_eq!(renderer.frames_in_flight(), config.frames_in_flight);
    assert_eq!(renderer.render_target().framebuffer_count(), renderer.image_count());

    let mut presented = 0;
    for _ in 0..(config.frames_in_flight * 3) {
        match renderer.draw_frame(&window).unwrap() {
            FrameOutcome::Presented => presented += 1,
            FrameOutcome::Recreated | FrameOutcome::Skipped => {}
        }
    }
    assert!(presented > 0);
}

#[test]
#[ignore = "requires a Vulkan device and a display"]
fn test_recreate_rebuilds_generation() {
    let (window, context) = setup();
    let mut renderer =
        FrameRenderer::new(&context, &window, &shader_store(), triangle(&context), &test_config()).unwrap();
    renderer.draw_frame(&window).unwrap();

    for expected in 1..=3 {
        assert_eq!(renderer.recreate(&window).unwrap(), FrameOutcome::Recreated);
        assert_eq!(renderer.generation(), expected);
        assert_eq!(renderer.render_target().framebuffer_count(), renderer.image_count());
        assert_eq!(renderer.pipeline().render_pass(), renderer.render_target().render_pass());
        assert_ne!(renderer.pipeline().handle(), vk::Pipeline::null());
        renderer.draw_frame(&window).unwrap();
    }
}
