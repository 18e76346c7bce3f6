use crate::{data, render, settings};
use render::{
    Buffer, Context, DoubleFramebuffer, Framebuffer, TextureOptions, Uniform, UniformValue,
    VertexArrayObject,
};
use settings::Settings;

use glow::HasContext;
use std::rc::Rc;

static FLUID_VERT_SHADER: &str = include_str!(concat!(env!("OUT_DIR"), "/shaders/fluid.vert"));
static BOUNDARY_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/boundary.frag"));
static SPLAT_FRAG_SHADER: &str = include_str!(concat!(env!("OUT_DIR"), "/shaders/splat.frag"));
static ADVECTION_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/advection.frag"));
static BUOYANCY_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/buoyancy.frag"));
static DIVERGENCE_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/divergence.frag"));
static JACOBI_FRAG_SHADER: &str = include_str!(concat!(env!("OUT_DIR"), "/shaders/jacobi.frag"));
static SUBTRACT_GRADIENT_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/subtract_gradient.frag"));
static PRESENT_FRAG_SHADER: &str =
    include_str!(concat!(env!("OUT_DIR"), "/shaders/present.frag"));

// The uniforms each pass binds. Checked against the linked programs at
// construction, so a misspelled name fails `Fluid::new` instead of being
// silently dropped on every frame.
const BOUNDARY_UNIFORMS: &[&str] = &["u_inverseSize"];
const SPLAT_UNIFORMS: &[&str] = &["u_texture", "u_point", "u_radius", "u_value"];
const ADVECTION_UNIFORMS: &[&str] = &[
    "u_boundary",
    "u_source",
    "u_velocity",
    "u_timeStep",
    "u_dissipation",
    "u_inverseSize",
];
const BUOYANCY_UNIFORMS: &[&str] = &[
    "u_velocity",
    "u_temperature",
    "u_density",
    "u_timeStep",
    "u_ambientTemperature",
    "u_sigma",
    "u_kappa",
];
const DIVERGENCE_UNIFORMS: &[&str] = &["u_boundary", "u_velocity", "u_inverseSize"];
const JACOBI_UNIFORMS: &[&str] = &[
    "u_boundary",
    "u_pressure",
    "u_divergence",
    "u_alpha",
    "u_inverseBeta",
    "u_inverseSize",
];
const SUBTRACT_GRADIENT_UNIFORMS: &[&str] = &[
    "u_boundary",
    "u_pressure",
    "u_velocity",
    "u_gradientScale",
    "u_inverseSize",
];
const PRESENT_UNIFORMS: &[&str] = &["u_boundary", "u_density"];

// Poisson stencil factors for a unit grid cell.
const JACOBI_ALPHA: f32 = -1.0;
const JACOBI_INVERSE_BETA: f32 = 0.25;

/// The simulation: a square grid of fields in GPU memory and the fixed
/// sequence of fullscreen passes that advances them by one timestep.
///
/// `step` runs the pipeline once; `present` draws the current density field
/// into whatever framebuffer is bound. The two are deliberately decoupled so
/// a caller can sub-step the simulation independently of display refresh.
pub struct Fluid {
    context: Context,
    settings: Rc<Settings>,

    size: u32,

    plane_vertices: Buffer,
    plane_indices: Buffer,
    vertex_buffer: VertexArrayObject,

    boundary: Framebuffer,
    divergence: Framebuffer,
    velocity: DoubleFramebuffer,
    temperature: DoubleFramebuffer,
    density: DoubleFramebuffer,
    pressure: DoubleFramebuffer,

    // Compiled once, retained for the simulation's lifetime. The boundary
    // pass only ever runs during construction.
    boundary_pass: render::Program,
    splat_pass: render::Program,
    advection_pass: render::Program,
    buoyancy_pass: render::Program,
    divergence_pass: render::Program,
    pressure_pass: render::Program,
    subtract_gradient_pass: render::Program,
    present_pass: render::Program,
}

impl Fluid {
    pub fn new(
        context: &Context,
        size: u32,
        settings: &Rc<Settings>,
    ) -> Result<Self, render::Problem> {
        if size == 0 {
            return Err(render::Problem::InvalidGridSize);
        }

        let inverse_size = inverse_size(size);

        // The mask, divergence, and pressure fields are sampled cell-by-cell;
        // the advected fields interpolate between cells.
        let nearest_options = TextureOptions::default();
        let linear_options = TextureOptions {
            mag_filter: glow::LINEAR,
            min_filter: glow::LINEAR,
            ..Default::default()
        };

        let boundary = Framebuffer::new(context, size, nearest_options)?;
        let divergence = Framebuffer::new(context, size, nearest_options)?;
        let velocity = DoubleFramebuffer::new(context, size, linear_options)?;
        let temperature = DoubleFramebuffer::new(context, size, linear_options)?;
        let density = DoubleFramebuffer::new(context, size, linear_options)?;
        let pressure = DoubleFramebuffer::new(context, size, nearest_options)?;

        // Geometry
        let plane_vertices = Buffer::from_f32(
            context,
            &data::PLANE_VERTICES,
            glow::ARRAY_BUFFER,
            glow::STATIC_DRAW,
        )?;
        let plane_indices = Buffer::from_u16(
            context,
            &data::PLANE_INDICES,
            glow::ELEMENT_ARRAY_BUFFER,
            glow::STATIC_DRAW,
        )?;

        let boundary_pass = render::Program::new(context, (FLUID_VERT_SHADER, BOUNDARY_FRAG_SHADER))?;
        let splat_pass = render::Program::new(context, (FLUID_VERT_SHADER, SPLAT_FRAG_SHADER))?;
        let advection_pass =
            render::Program::new(context, (FLUID_VERT_SHADER, ADVECTION_FRAG_SHADER))?;
        let buoyancy_pass =
            render::Program::new(context, (FLUID_VERT_SHADER, BUOYANCY_FRAG_SHADER))?;
        let divergence_pass =
            render::Program::new(context, (FLUID_VERT_SHADER, DIVERGENCE_FRAG_SHADER))?;
        let pressure_pass = render::Program::new(context, (FLUID_VERT_SHADER, JACOBI_FRAG_SHADER))?;
        let subtract_gradient_pass =
            render::Program::new(context, (FLUID_VERT_SHADER, SUBTRACT_GRADIENT_FRAG_SHADER))?;
        let present_pass = render::Program::new(context, (FLUID_VERT_SHADER, PRESENT_FRAG_SHADER))?;

        boundary_pass.verify_uniforms(BOUNDARY_UNIFORMS)?;
        splat_pass.verify_uniforms(SPLAT_UNIFORMS)?;
        advection_pass.verify_uniforms(ADVECTION_UNIFORMS)?;
        buoyancy_pass.verify_uniforms(BUOYANCY_UNIFORMS)?;
        divergence_pass.verify_uniforms(DIVERGENCE_UNIFORMS)?;
        pressure_pass.verify_uniforms(JACOBI_UNIFORMS)?;
        subtract_gradient_pass.verify_uniforms(SUBTRACT_GRADIENT_UNIFORMS)?;
        present_pass.verify_uniforms(PRESENT_UNIFORMS)?;

        // Texture units and grid-scale factors never change, so bind them
        // once up front.
        boundary_pass.set_uniform(&Uniform {
            name: "u_inverseSize",
            value: UniformValue::Vec2(&inverse_size),
        });

        splat_pass.set_uniform(&Uniform {
            name: "u_texture",
            value: UniformValue::Texture2D(0),
        });

        advection_pass.set_uniforms(&[
            &Uniform {
                name: "u_boundary",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_source",
                value: UniformValue::Texture2D(1),
            },
            &Uniform {
                name: "u_velocity",
                value: UniformValue::Texture2D(2),
            },
            &Uniform {
                name: "u_inverseSize",
                value: UniformValue::Vec2(&inverse_size),
            },
        ]);

        buoyancy_pass.set_uniforms(&[
            &Uniform {
                name: "u_velocity",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_temperature",
                value: UniformValue::Texture2D(1),
            },
            &Uniform {
                name: "u_density",
                value: UniformValue::Texture2D(2),
            },
        ]);

        divergence_pass.set_uniforms(&[
            &Uniform {
                name: "u_boundary",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_velocity",
                value: UniformValue::Texture2D(1),
            },
            &Uniform {
                name: "u_inverseSize",
                value: UniformValue::Vec2(&inverse_size),
            },
        ]);

        pressure_pass.set_uniforms(&[
            &Uniform {
                name: "u_boundary",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_pressure",
                value: UniformValue::Texture2D(1),
            },
            &Uniform {
                name: "u_divergence",
                value: UniformValue::Texture2D(2),
            },
            &Uniform {
                name: "u_alpha",
                value: UniformValue::Float(JACOBI_ALPHA),
            },
            &Uniform {
                name: "u_inverseBeta",
                value: UniformValue::Float(JACOBI_INVERSE_BETA),
            },
            &Uniform {
                name: "u_inverseSize",
                value: UniformValue::Vec2(&inverse_size),
            },
        ]);

        subtract_gradient_pass.set_uniforms(&[
            &Uniform {
                name: "u_boundary",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_pressure",
                value: UniformValue::Texture2D(1),
            },
            &Uniform {
                name: "u_velocity",
                value: UniformValue::Texture2D(2),
            },
            &Uniform {
                name: "u_inverseSize",
                value: UniformValue::Vec2(&inverse_size),
            },
        ]);

        present_pass.set_uniforms(&[
            &Uniform {
                name: "u_boundary",
                value: UniformValue::Texture2D(0),
            },
            &Uniform {
                name: "u_density",
                value: UniformValue::Texture2D(1),
            },
        ]);

        let vertex_buffer = VertexArrayObject::new(
            context,
            &advection_pass,
            &[(
                &plane_vertices,
                render::VertexBufferLayout {
                    name: "position",
                    size: 2,
                    type_: glow::FLOAT,
                    ..Default::default()
                },
            )],
            Some(&plane_indices),
        )?;

        let fluid = Self {
            context: Rc::clone(context),
            settings: Rc::clone(settings),

            size,

            plane_vertices,
            plane_indices,
            vertex_buffer,

            boundary,
            divergence,
            velocity,
            temperature,
            density,
            pressure,

            boundary_pass,
            splat_pass,
            advection_pass,
            buoyancy_pass,
            divergence_pass,
            pressure_pass,
            subtract_gradient_pass,
            present_pass,
        };

        fluid.fill_boundary();
        Ok(fluid)
    }

    /// Write the solid rim into the boundary mask. Runs once; the mask is
    /// static for the life of the simulation.
    fn fill_boundary(&self) {
        self.boundary_pass.use_program();

        unsafe {
            self.context.bind_vertex_array(Some(self.vertex_buffer.id));
        }

        self.boundary.draw_to(&self.context, || unsafe {
            self.context
                .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
        });

        unsafe {
            self.context.bind_vertex_array(None);
        }
    }

    pub fn update(&mut self, settings: &Rc<Settings>) {
        self.settings = Rc::clone(settings);
    }

    /// Advance the simulation by one timestep.
    pub fn step(&self, timestep: f32) {
        unsafe {
            self.context.bind_vertex_array(Some(self.vertex_buffer.id));
        }

        self.advect(timestep);
        self.apply_buoyancy(timestep);
        self.calculate_divergence();
        self.solve_pressure();
        self.subtract_gradient();
        self.inject_source();

        unsafe {
            self.context.bind_vertex_array(None);
        }
    }

    // Velocity first: temperature and density are transported by the
    // already-advected velocity field, while velocity carries itself with its
    // own prior state.
    fn advect(&self, timestep: f32) {
        self.advection_pass.use_program();
        self.advection_pass.set_uniform(&Uniform {
            name: "u_timeStep",
            value: UniformValue::Float(timestep),
        });

        let fields = [
            (&self.velocity, self.settings.velocity_dissipation),
            (&self.temperature, self.settings.temperature_dissipation),
            (&self.density, self.settings.density_dissipation),
        ];

        for (field, dissipation) in fields {
            self.advection_pass.set_uniform(&Uniform {
                name: "u_dissipation",
                value: UniformValue::Float(dissipation),
            });

            field.draw_to(&self.context, |source| unsafe {
                self.context.active_texture(glow::TEXTURE0);
                self.context
                    .bind_texture(glow::TEXTURE_2D, Some(self.boundary.texture));
                self.context.active_texture(glow::TEXTURE1);
                self.context
                    .bind_texture(glow::TEXTURE_2D, Some(source.texture));
                self.context.active_texture(glow::TEXTURE2);
                self.context
                    .bind_texture(glow::TEXTURE_2D, Some(self.velocity.read().texture));

                self.context
                    .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
            });
        }
    }

    fn apply_buoyancy(&self, timestep: f32) {
        self.buoyancy_pass.use_program();
        self.buoyancy_pass.set_uniforms(&[
            &Uniform {
                name: "u_timeStep",
                value: UniformValue::Float(timestep),
            },
            &Uniform {
                name: "u_ambientTemperature",
                value: UniformValue::Float(self.settings.ambient_temperature),
            },
            &Uniform {
                name: "u_sigma",
                value: UniformValue::Float(self.settings.sigma),
            },
            &Uniform {
                name: "u_kappa",
                value: UniformValue::Float(self.settings.kappa),
            },
        ]);

        self.velocity.draw_to(&self.context, |velocity| unsafe {
            self.context.active_texture(glow::TEXTURE0);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(velocity.texture));
            self.context.active_texture(glow::TEXTURE1);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.temperature.read().texture));
            self.context.active_texture(glow::TEXTURE2);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.density.read().texture));

            self.context
                .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
        });
    }

    fn calculate_divergence(&self) {
        self.divergence_pass.use_program();

        self.divergence.draw_to(&self.context, || unsafe {
            self.context.active_texture(glow::TEXTURE0);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.boundary.texture));
            self.context.active_texture(glow::TEXTURE1);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.velocity.read().texture));

            self.context
                .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
        });
    }

    fn solve_pressure(&self) {
        // Zero the write buffer and swap so every solve starts from a clean
        // initial guess.
        self.pressure.write().zero_out();
        self.pressure.swap();

        self.pressure_pass.use_program();

        unsafe {
            self.context.active_texture(glow::TEXTURE0);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.boundary.texture));
            self.context.active_texture(glow::TEXTURE2);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.divergence.texture));
        }

        for _ in 0..self.settings.pressure_iterations {
            self.pressure.draw_to(&self.context, |pressure| unsafe {
                self.context.active_texture(glow::TEXTURE1);
                self.context
                    .bind_texture(glow::TEXTURE_2D, Some(pressure.texture));

                self.context
                    .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
            });
        }
    }

    fn subtract_gradient(&self) {
        self.subtract_gradient_pass.use_program();
        self.subtract_gradient_pass.set_uniform(&Uniform {
            name: "u_gradientScale",
            value: UniformValue::Float(self.settings.gradient_scale),
        });

        self.velocity.draw_to(&self.context, |velocity| unsafe {
            self.context.active_texture(glow::TEXTURE0);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.boundary.texture));
            self.context.active_texture(glow::TEXTURE1);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.pressure.read().texture));
            self.context.active_texture(glow::TEXTURE2);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(velocity.texture));

            self.context
                .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
        });
    }

    // A constant heat and smoke source keeps the simulation alive without
    // any external input. Deliberately not gated on the timestep.
    fn inject_source(&self) {
        self.splat_pass.use_program();
        self.splat_pass.set_uniforms(&[
            &Uniform {
                name: "u_point",
                value: UniformValue::Vec2(&self.settings.splat_point),
            },
            &Uniform {
                name: "u_radius",
                value: UniformValue::Float(self.settings.splat_radius),
            },
        ]);

        let fields = [
            (&self.temperature, self.settings.splat_temperature),
            (&self.density, self.settings.splat_density),
        ];

        for (field, strength) in fields {
            self.splat_pass.set_uniform(&Uniform {
                name: "u_value",
                value: UniformValue::Vec3(&[strength, 0.0, 0.0]),
            });

            field.draw_to(&self.context, |source| unsafe {
                self.context.active_texture(glow::TEXTURE0);
                self.context
                    .bind_texture(glow::TEXTURE_2D, Some(source.texture));

                self.context
                    .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
            });
        }
    }

    /// Draw the current density field, masked by the boundary, into whatever
    /// framebuffer and viewport are currently bound.
    pub fn present(&self) {
        self.present_pass.use_program();

        unsafe {
            self.context.bind_vertex_array(Some(self.vertex_buffer.id));

            self.context.active_texture(glow::TEXTURE0);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.boundary.texture));
            self.context.active_texture(glow::TEXTURE1);
            self.context
                .bind_texture(glow::TEXTURE_2D, Some(self.density.read().texture));

            self.context
                .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);

            self.context.bind_vertex_array(None);
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.size
    }

    pub fn get_velocity(&self) -> &Framebuffer {
        self.velocity.read()
    }

    pub fn get_density(&self) -> &Framebuffer {
        self.density.read()
    }

    pub fn get_pressure(&self) -> &Framebuffer {
        self.pressure.read()
    }

    pub fn get_divergence(&self) -> &Framebuffer {
        &self.divergence
    }
}

fn inverse_size(size: u32) -> [f32; 2] {
    [1.0 / size as f32; 2]
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_declares(kernel: &str, source: &str, uniforms: &[&str]) {
        for uniform in uniforms {
            assert!(
                source.contains(uniform),
                "{} does not declare {}",
                kernel,
                uniform
            );
        }
    }

    // Every uniform a pass binds at runtime has to survive in its kernel
    // source, or `verify_uniforms` rejects the program at construction.
    #[test]
    fn kernel_sources_declare_their_bindings() {
        assert_declares("boundary", BOUNDARY_FRAG_SHADER, BOUNDARY_UNIFORMS);
        assert_declares("splat", SPLAT_FRAG_SHADER, SPLAT_UNIFORMS);
        assert_declares("advection", ADVECTION_FRAG_SHADER, ADVECTION_UNIFORMS);
        assert_declares("buoyancy", BUOYANCY_FRAG_SHADER, BUOYANCY_UNIFORMS);
        assert_declares("divergence", DIVERGENCE_FRAG_SHADER, DIVERGENCE_UNIFORMS);
        assert_declares("jacobi", JACOBI_FRAG_SHADER, JACOBI_UNIFORMS);
        assert_declares(
            "subtractGradient",
            SUBTRACT_GRADIENT_FRAG_SHADER,
            SUBTRACT_GRADIENT_UNIFORMS,
        );
        assert_declares("present", PRESENT_FRAG_SHADER, PRESENT_UNIFORMS);
    }

    #[test]
    fn present_samples_the_boundary_mask() {
        assert!(PRESENT_FRAG_SHADER.contains("texture(u_boundary"));
        assert!(PRESENT_FRAG_SHADER.contains("texture(u_density"));
    }

    #[test]
    fn all_kernels_share_one_vertex_stage() {
        assert!(FLUID_VERT_SHADER.contains("position"));
        assert!(FLUID_VERT_SHADER.contains("v_uv"));
    }

    #[test]
    fn inverse_size_is_the_cell_to_coordinate_scale() {
        assert_eq!(inverse_size(128), [1.0 / 128.0, 1.0 / 128.0]);
        assert_eq!(inverse_size(1), [1.0, 1.0]);
    }
}
