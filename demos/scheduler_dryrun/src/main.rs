use std::sync::Arc;

use anyhow::Result;
use rdg::{AccessDeclarations, GraphSession, PassFlags, Rdg, RdgConfig};
use rdg_device::{
    Access, AccessState, BufferDesc, BufferUsage, Command, Format, HeadlessDevice, ResourceId,
    TextureDesc, TextureUsage, ThreadPool,
};

fn main() -> Result<(), anyhow::Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Trace)
        .init()?;

    let device = HeadlessDevice::new();
    let workers = Arc::new(ThreadPool::with_available_parallelism()?);
    let mut rdg = Rdg::new(
        Arc::new(device.clone()),
        workers,
        RdgConfig {
            validation: true,
            ..Default::default()
        },
    );
    let mut session = GraphSession::new();
    let mut graph = rdg.record(&mut session);

    let swapchain_desc = TextureDesc::texture_2d(
        64,
        64,
        Format::B8G8R8A8Unorm,
        TextureUsage::RENDER_TARGET | TextureUsage::PRESENT,
    );
    let swapchain = graph.register_external_texture(
        ResourceId(0xdead),
        swapchain_desc,
        Some(AccessState::graphics(Access::PRESENT)),
        "swapchain",
    )?;

    let shadows_img = graph.create_texture(
        TextureDesc::texture_2d(64, 64, Format::D32Float, TextureUsage::DEPTH_STENCIL | TextureUsage::SAMPLED),
        "shadow_map",
    )?;
    let lookup = graph.create_texture(
        TextureDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, TextureUsage::STORAGE | TextureUsage::SAMPLED),
        "lookup",
    )?;
    let color = graph.create_texture(
        TextureDesc::texture_2d(
            64,
            64,
            Format::R16G16B16A16Float,
            TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
        ),
        "hdr_color",
    )?;
    let depth = graph.create_texture(
        TextureDesc::texture_2d(64, 64, Format::D32Float, TextureUsage::DEPTH_STENCIL),
        "depth",
    )?;
    let overlay = graph.create_texture(
        TextureDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, TextureUsage::RENDER_TARGET),
        "debug_overlay",
    )?;
    let histogram = graph.create_buffer(
        BufferDesc::new(4, 256, BufferUsage::STORAGE | BufferUsage::SHADER_READ),
        "histogram",
    )?;

    graph.add_pass(
        "independent_compute",
        AccessDeclarations::build(|d| {
            d.write_texture(lookup, Access::UAV_COMPUTE);
        }),
        PassFlags::ASYNC_COMPUTE,
        |_, ctx| ctx.stream().marker("dispatch lookup"),
    )?;
    graph.add_pass(
        "shadows",
        AccessDeclarations::build(|d| {
            d.depth_stencil(shadows_img, true);
        }),
        PassFlags::RASTER,
        |_, ctx| ctx.stream().marker("draw shadow casters"),
    )?;
    graph.add_pass(
        "forward",
        AccessDeclarations::build(|d| {
            d.read_texture(shadows_img, Access::SRV_GRAPHICS)
                .read_texture(lookup, Access::SRV_GRAPHICS)
                .render_target(color, 0)
                .depth_stencil(depth, true);
        }),
        PassFlags::RASTER,
        |_, ctx| ctx.stream().marker("draw opaque"),
    )?;
    graph.add_pass(
        "forward_transparent",
        AccessDeclarations::build(|d| {
            d.render_target(color, 0).depth_stencil(depth, true);
        }),
        PassFlags::RASTER,
        |_, ctx| ctx.stream().marker("draw transparent"),
    )?;
    graph.add_pass(
        "histogram",
        AccessDeclarations::build(|d| {
            d.read_texture(color, Access::SRV_COMPUTE)
                .write_buffer(histogram, Access::UAV_COMPUTE);
        }),
        PassFlags::ASYNC_COMPUTE,
        |_, ctx| ctx.stream().marker("build histogram"),
    )?;
    //never read, culled
    graph.add_pass(
        "debug_overlay",
        AccessDeclarations::build(|d| {
            d.render_target(overlay, 0);
        }),
        PassFlags::RASTER,
        |_, ctx| ctx.stream().marker("draw overlay"),
    )?;
    graph.add_pass(
        "final",
        AccessDeclarations::build(|d| {
            d.read_texture(color, Access::SRV_GRAPHICS)
                .read_buffer(histogram, Access::SRV_GRAPHICS)
                .render_target(swapchain, 0);
        }),
        PassFlags::RASTER,
        |_, ctx| ctx.stream().marker("tonemap"),
    )?;
    graph.set_texture_access_final(swapchain, Access::PRESENT)?;
    graph.add_post_execute_callback(|| log::info!("Frame submitted"));

    let compiled = graph.compile()?;
    println!("{}", compiled);
    let report = compiled.execute()?;

    println!("{}", session);
    println!("Executed: {:?}", report.executed_passes);
    for submission in device.submissions() {
        println!("Submission {} on {}", submission.name, submission.pipeline);
        for command in &submission.commands {
            match command {
                Command::BeginTransitions(t) => println!("    begin {} transitions", t.len()),
                Command::EndTransitions(t) => println!("    end {} transitions", t.len()),
                other => println!("    {:?}", other),
            }
        }
    }
    Ok(())
}
