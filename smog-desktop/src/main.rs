use glow::HasContext;
use glutin::event::{Event, WindowEvent};
use glutin::event_loop::{ControlFlow, EventLoop};
use glutin::window::Window;
use glutin::PossiblyCurrent;
use smog::{Fluid, Settings};
use std::rc::Rc;

#[cfg(target_os = "macos")]
use glutin::platform::macos::WindowBuilderExtMacOS;

const GRID_SIZE: u32 = 256;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let logical_size = glutin::dpi::LogicalSize::new(720, 720);
    let (context, window, event_loop) = get_rendering_context(logical_size);
    let context = Rc::new(context);

    let settings = Rc::new(Settings::default());
    let fluid = match Fluid::new(&context, GRID_SIZE, &settings) {
        Ok(fluid) => fluid,
        Err(problem) => {
            log::error!("Cannot start the simulation: {}", problem);
            std::process::exit(1);
        }
    };

    let max_timestep = 1.0 / 10.0;
    let mut last_frame = std::time::Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::MainEventsCleared => {
                window.window().request_redraw();
            }

            Event::RedrawRequested(_) => {
                let now = std::time::Instant::now();
                let timestep = f32::min(max_timestep, (now - last_frame).as_secs_f32());
                last_frame = now;

                fluid.step(timestep);

                let physical_size = window.window().inner_size();
                unsafe {
                    context.viewport(
                        0,
                        0,
                        physical_size.width as i32,
                        physical_size.height as i32,
                    );
                    context.clear_color(0.0, 0.0, 0.0, 1.0);
                    context.clear(glow::COLOR_BUFFER_BIT);
                }

                fluid.present();
                window.swap_buffers().unwrap();
            }

            Event::WindowEvent { ref event, .. } => match event {
                WindowEvent::Resized(physical_size) => window.resize(*physical_size),
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                _ => (),
            },

            _ => (),
        }
    });
}

pub fn get_rendering_context(
    logical_size: glutin::dpi::LogicalSize<u32>,
) -> (
    glow::Context,
    glutin::ContextWrapper<PossiblyCurrent, Window>,
    EventLoop<()>,
) {
    let event_loop = glutin::event_loop::EventLoop::new();

    #[cfg(not(target_os = "macos"))]
    let window_builder = glutin::window::WindowBuilder::new()
        .with_title("Smog")
        .with_decorations(true)
        .with_resizable(true)
        .with_inner_size(logical_size);

    #[cfg(target_os = "macos")]
    let window_builder = glutin::window::WindowBuilder::new()
        .with_title("Smog")
        .with_inner_size(logical_size)
        .with_resizable(true)
        .with_title_hidden(true)
        .with_titlebar_transparent(true)
        .with_fullsize_content_view(true);

    let window = glutin::ContextBuilder::new()
        .with_vsync(true)
        .with_multisampling(0)
        .with_double_buffer(Some(true))
        .with_gl_profile(glutin::GlProfile::Core)
        .build_windowed(window_builder, &event_loop)
        .unwrap();
    let window = unsafe { window.make_current().unwrap() };

    let gl =
        unsafe { glow::Context::from_loader_function(|s| window.get_proc_address(s) as *const _) };

    (gl, window, event_loop)
}
