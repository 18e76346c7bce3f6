use glow::HasContext;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

pub type Context = Rc<glow::Context>;
type GlDataType = u32;
type Result<T> = std::result::Result<T, Problem>;

#[derive(Error, Debug)]
pub enum Problem {
    #[error("Grid size must be a positive integer")]
    InvalidGridSize,

    #[error("Cannot create buffer")]
    CannotCreateBuffer,

    #[error("Cannot create texture")]
    CannotCreateTexture,

    #[error("Cannot create framebuffer")]
    CannotCreateFramebuffer,

    #[error("Cannot create vertex array")]
    CannotCreateVertexArray,

    #[error("{}", match .0 {
        Some(log) => format!("Cannot compile shader: {}", log),
        None => "Cannot compile shader".to_string(),
    })]
    CannotCompileShader(Option<String>),

    #[error("Cannot create program")]
    CannotCreateProgram,

    #[error("Cannot link program: {0}")]
    CannotLinkProgram(String),

    #[error("Program does not bind the uniform “{0}”")]
    MissingUniform(String),

    #[error("Texture format is not supported")]
    UnsupportedTextureFormat,

    #[error("Vertex attribute type is not supported")]
    CannotBindUnsupportedVertexType,
}

pub struct Buffer {
    context: Context,
    pub id: glow::Buffer,
    pub size: usize,
    pub type_: u32,
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.context.delete_buffer(self.id);
        }
    }
}

impl Buffer {
    pub fn from_bytes(
        context: &Context,
        data: &[u8],
        buffer_type: u32,
        usage: u32,
    ) -> Result<Self> {
        let buffer = unsafe {
            let buffer = context
                .create_buffer()
                .map_err(|_| Problem::CannotCreateBuffer)?;

            context.bind_buffer(buffer_type, Some(buffer));
            context.buffer_data_u8_slice(buffer_type, data, usage);
            context.bind_buffer(buffer_type, None);

            buffer
        };

        Ok(Self {
            context: Rc::clone(context),
            id: buffer,
            size: data.len(),
            type_: buffer_type,
        })
    }

    pub fn from_f32(context: &Context, data: &[f32], buffer_type: u32, usage: u32) -> Result<Self> {
        Self::from_bytes(context, bytemuck::cast_slice(data), buffer_type, usage)
    }

    pub fn from_u16(context: &Context, data: &[u16], buffer_type: u32, usage: u32) -> Result<Self> {
        Self::from_bytes(context, bytemuck::cast_slice(data), buffer_type, usage)
    }
}

#[derive(Clone, Copy)]
pub struct TextureOptions {
    pub mag_filter: GlDataType,
    pub min_filter: GlDataType,
    pub wrap_s: GlDataType,
    pub wrap_t: GlDataType,
    pub format: GlDataType,
}

impl Default for TextureOptions {
    fn default() -> Self {
        TextureOptions {
            mag_filter: glow::NEAREST,
            min_filter: glow::NEAREST,
            wrap_s: glow::CLAMP_TO_EDGE,
            wrap_t: glow::CLAMP_TO_EDGE,
            format: glow::RGBA16F,
        }
    }
}

/// A fixed-size grid of floating-point cells, usable both as a draw target
/// and as a sampling source. The texture storage is allocated and zeroed at
/// construction and never resized.
pub struct Framebuffer {
    context: Context,
    pub id: glow::Framebuffer,
    pub size: u32,
    pub texture: glow::Texture,
    pub options: TextureOptions,
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.context
                .bind_framebuffer(glow::FRAMEBUFFER, Some(self.id));
            self.context.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                None,
                0,
            );
            self.context.bind_framebuffer(glow::FRAMEBUFFER, None);
            self.context.delete_framebuffer(self.id);
            self.context.delete_texture(self.texture);
        }
    }
}

impl Framebuffer {
    pub fn new(context: &Context, size: u32, options: TextureOptions) -> Result<Self> {
        let TextureFormat {
            internal_format,
            format,
            type_,
            ..
        } = detect_texture_format(options.format)?;

        let (framebuffer, texture) = unsafe {
            let texture = context
                .create_texture()
                .map_err(|_| Problem::CannotCreateTexture)?;

            context.bind_texture(glow::TEXTURE_2D, Some(texture));
            context.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                options.mag_filter as i32,
            );
            context.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                options.min_filter as i32,
            );
            context.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                options.wrap_s as i32,
            );
            context.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                options.wrap_t as i32,
            );
            context.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal_format as i32,
                size as i32,
                size as i32,
                0,
                format,
                type_,
                None,
            );
            context.bind_texture(glow::TEXTURE_2D, None);

            let framebuffer = context
                .create_framebuffer()
                .map_err(|_| Problem::CannotCreateFramebuffer)?;

            context.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            context.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            context.bind_framebuffer(glow::FRAMEBUFFER, None);

            (framebuffer, texture)
        };

        let framebuffer = Self {
            context: Rc::clone(context),
            id: framebuffer,
            size,
            texture,
            options,
        };

        framebuffer.zero_out();
        Ok(framebuffer)
    }

    pub fn zero_out(&self) {
        self.clear_color_with(&[0.0, 0.0, 0.0, 0.0])
    }

    pub fn clear_color_with(&self, color: &[f32; 4]) {
        unsafe {
            self.context
                .bind_framebuffer(glow::FRAMEBUFFER, Some(self.id));
            self.context
                .viewport(0, 0, self.size as i32, self.size as i32);
            self.context
                .clear_color(color[0], color[1], color[2], color[3]);
            self.context.clear(glow::COLOR_BUFFER_BIT);
            self.context.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    pub fn draw_to<T>(&self, context: &Context, draw_call: T)
    where
        T: Fn(),
    {
        unsafe {
            context.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(self.id));
            context.viewport(0, 0, self.size as i32, self.size as i32);
            draw_call();
            context.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
        }
    }
}

/// A ping-pong pair of framebuffers. Which of the two is the read target is
/// tracked with a single index; `swap` flips the index without copying any
/// data.
///
/// `draw_to` runs one write pass and swaps afterwards, so a stage can never
/// forget the swap or apply it twice.
pub struct DoubleFramebuffer {
    pub size: u32,
    buffers: [Framebuffer; 2],
    read_index: Cell<usize>,
}

impl DoubleFramebuffer {
    pub fn new(context: &Context, size: u32, options: TextureOptions) -> Result<Self> {
        let front = Framebuffer::new(context, size, options)?;
        let back = Framebuffer::new(context, size, options)?;

        Ok(Self {
            size,
            buffers: [front, back],
            read_index: Cell::new(0),
        })
    }

    pub fn read(&self) -> &Framebuffer {
        &self.buffers[self.read_index.get()]
    }

    pub fn write(&self) -> &Framebuffer {
        &self.buffers[other(self.read_index.get())]
    }

    pub fn swap(&self) {
        self.read_index.set(other(self.read_index.get()));
    }

    pub fn zero_out(&self) {
        self.buffers[0].zero_out();
        self.buffers[1].zero_out();
    }

    pub fn draw_to<T>(&self, context: &Context, draw_call: T)
    where
        T: Fn(&Framebuffer),
    {
        let target = self.write();

        unsafe {
            context.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(target.id));
            context.viewport(0, 0, target.size as i32, target.size as i32);
            draw_call(self.read());
            context.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
        }

        self.swap();
    }
}

// The ping-pong index flip: maps the read index to the write index and, on
// swap, back again.
fn other(index: usize) -> usize {
    1 - index
}

pub struct Program {
    context: Context,
    pub program: glow::Program,
    attributes: FxHashMap<String, AttributeInfo>,
    uniforms: FxHashMap<String, UniformInfo>,
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe {
            self.context.delete_program(self.program);
        }
    }
}

impl Program {
    pub fn new(context: &Context, shaders: (&str, &str)) -> Result<Self> {
        let vertex_shader = compile_shader(context, glow::VERTEX_SHADER, shaders.0)?;
        let fragment_shader = compile_shader(context, glow::FRAGMENT_SHADER, shaders.1)?;

        let program = unsafe {
            let program = context
                .create_program()
                .map_err(|_| Problem::CannotCreateProgram)?;
            context.attach_shader(program, vertex_shader);
            context.attach_shader(program, fragment_shader);
            context.link_program(program);

            if !context.get_program_link_status(program) {
                return Err(Problem::CannotLinkProgram(
                    context.get_program_info_log(program),
                ));
            }

            // Free the shader objects; the linked program keeps its own copy.
            context.detach_shader(program, vertex_shader);
            context.detach_shader(program, fragment_shader);
            context.delete_shader(vertex_shader);
            context.delete_shader(fragment_shader);

            program
        };

        let mut attributes = FxHashMap::default();
        unsafe {
            let attribute_count = context.get_active_attributes(program);
            for num in 0..attribute_count {
                if let Some(info) = context.get_active_attribute(program, num) {
                    if let Some(location) = context.get_attrib_location(program, &info.name) {
                        attributes.insert(
                            info.name,
                            AttributeInfo {
                                type_: info.atype,
                                size: info.size as u32,
                                location,
                            },
                        );
                    }
                }
            }
        }

        let mut uniforms = FxHashMap::default();
        unsafe {
            let uniform_count = context.get_active_uniforms(program);
            for num in 0..uniform_count {
                if let Some(info) = context.get_active_uniform(program, num) {
                    if let Some(location) = context.get_uniform_location(program, &info.name) {
                        uniforms.insert(
                            info.name,
                            UniformInfo {
                                type_: info.utype,
                                size: info.size,
                                location,
                            },
                        );
                    }
                }
            }
        }

        Ok(Program {
            context: Rc::clone(context),
            program,
            attributes,
            uniforms,
        })
    }

    /// Check that every uniform a pass is going to bind survived shader
    /// compilation. Catches a misspelled binding at construction instead of
    /// silently ignoring it on every frame.
    pub fn verify_uniforms(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if !self.uniforms.contains_key(*name) {
                return Err(Problem::MissingUniform(name.to_string()));
            }
        }

        Ok(())
    }

    pub fn use_program(&self) {
        unsafe {
            self.context.use_program(Some(self.program));
        }
    }

    pub fn set_uniforms(&self, uniforms: &[&Uniform]) {
        for uniform in uniforms.iter() {
            self.set_uniform(uniform);
        }
    }

    pub fn set_uniform(&self, uniform: &Uniform) {
        let location = self.get_uniform_location(uniform.name);
        if location.is_none() {
            // The GLSL compiler strips uniforms it can prove are unused.
            log::debug!("No such uniform: {}", uniform.name);
            return;
        }

        let context = &self.context;
        self.use_program();

        unsafe {
            match uniform.value {
                UniformValue::SignedInt(value) => {
                    context.uniform_1_i32(location.as_ref(), value)
                }

                UniformValue::Float(value) => context.uniform_1_f32(location.as_ref(), value),

                UniformValue::Vec2(value) => {
                    context.uniform_2_f32(location.as_ref(), value[0], value[1])
                }

                UniformValue::Vec3(value) => {
                    context.uniform_3_f32(location.as_ref(), value[0], value[1], value[2])
                }

                UniformValue::Texture2D(unit) => {
                    context.uniform_1_i32(location.as_ref(), unit as i32)
                }
            }
        }
    }

    pub fn get_attrib_location(&self, name: &str) -> Option<u32> {
        self.attributes.get(name).map(|info| info.location)
    }

    pub fn get_uniform_location(&self, name: &str) -> Option<glow::UniformLocation> {
        self.uniforms.get(name).map(|info| info.location.clone())
    }
}

#[derive(Clone)]
struct AttributeInfo {
    #[allow(dead_code)]
    type_: u32,
    #[allow(dead_code)]
    size: u32,
    location: u32,
}

#[derive(Clone)]
struct UniformInfo {
    #[allow(dead_code)]
    type_: u32,
    #[allow(dead_code)]
    size: i32,
    location: glow::UniformLocation,
}

pub struct Uniform<'a> {
    pub name: &'static str,
    pub value: UniformValue<'a>,
}

#[allow(dead_code)]
#[derive(Clone)]
pub enum UniformValue<'a> {
    SignedInt(i32),
    Float(f32),
    Vec2(&'a [f32; 2]),
    Vec3(&'a [f32; 3]),
    Texture2D(u32),
}

pub fn compile_shader(context: &Context, shader_type: u32, source: &str) -> Result<glow::Shader> {
    unsafe {
        let shader = context
            .create_shader(shader_type)
            .map_err(|_| Problem::CannotCompileShader(None))?;
        context.shader_source(shader, source);
        context.compile_shader(shader);

        if context.get_shader_compile_status(shader) {
            Ok(shader)
        } else {
            Err(Problem::CannotCompileShader(Some(
                context.get_shader_info_log(shader),
            )))
        }
    }
}

#[derive(Default)]
pub struct VertexBufferLayout {
    pub name: &'static str,
    pub size: u32,
    pub type_: u32,
    pub stride: u32,
    pub offset: u32,
}

pub struct VertexArrayObject {
    context: Context,
    pub id: glow::VertexArray,
}

impl Drop for VertexArrayObject {
    fn drop(&mut self) {
        unsafe {
            self.context.delete_vertex_array(self.id);
        }
    }
}

impl VertexArrayObject {
    pub fn new(
        context: &Context,
        program: &Program,
        vertices: &[(&Buffer, VertexBufferLayout)],
        indices: Option<&Buffer>,
    ) -> Result<Self> {
        let id = unsafe {
            context
                .create_vertex_array()
                .map_err(|_| Problem::CannotCreateVertexArray)?
        };

        unsafe {
            context.bind_vertex_array(Some(id));

            for (buffer, layout) in vertices.iter() {
                bind_attributes(context, program, buffer, layout)?;
            }

            if indices.is_some() {
                context.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, indices.map(|buffer| buffer.id));
            }

            context.bind_vertex_array(None);
        }

        Ok(Self {
            id,
            context: Rc::clone(context),
        })
    }
}

fn bind_attributes(
    context: &Context,
    program: &Program,
    buffer: &Buffer,
    layout: &VertexBufferLayout,
) -> Result<()> {
    unsafe {
        context.bind_buffer(glow::ARRAY_BUFFER, Some(buffer.id));

        if let Some(location) = program.get_attrib_location(layout.name) {
            context.enable_vertex_attrib_array(location);

            match layout.type_ {
                glow::FLOAT => context.vertex_attrib_pointer_f32(
                    location,
                    layout.size as i32,
                    layout.type_,
                    false,
                    layout.stride as i32,
                    layout.offset as i32,
                ),
                _ => return Err(Problem::CannotBindUnsupportedVertexType),
            };
        }

        context.bind_buffer(glow::ARRAY_BUFFER, None);
    }

    Ok(())
}

pub struct TextureFormat {
    pub internal_format: GlDataType,
    pub format: GlDataType,
    pub type_: GlDataType,
    pub components: usize,
}

pub fn detect_texture_format(internal_format: GlDataType) -> Result<TextureFormat> {
    match internal_format {
        glow::R16F => Ok(TextureFormat {
            internal_format,
            format: glow::RED,
            type_: glow::HALF_FLOAT,
            components: 1,
        }),
        glow::R32F => Ok(TextureFormat {
            internal_format,
            format: glow::RED,
            type_: glow::FLOAT,
            components: 1,
        }),
        glow::RG16F => Ok(TextureFormat {
            internal_format,
            format: glow::RG,
            type_: glow::HALF_FLOAT,
            components: 2,
        }),
        glow::RGBA16F => Ok(TextureFormat {
            internal_format,
            format: glow::RGBA,
            type_: glow::HALF_FLOAT,
            components: 4,
        }),
        glow::RGBA32F => Ok(TextureFormat {
            internal_format,
            format: glow::RGBA,
            type_: glow::FLOAT,
            components: 4,
        }),
        _ => Err(Problem::UnsupportedTextureFormat),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_half_float_formats() {
        let format = detect_texture_format(glow::RGBA16F).unwrap();
        assert_eq!(format.format, glow::RGBA);
        assert_eq!(format.type_, glow::HALF_FLOAT);
        assert_eq!(format.components, 4);

        let format = detect_texture_format(glow::R16F).unwrap();
        assert_eq!(format.format, glow::RED);
        assert_eq!(format.type_, glow::HALF_FLOAT);
        assert_eq!(format.components, 1);
    }

    #[test]
    fn detects_full_float_formats() {
        let format = detect_texture_format(glow::RGBA32F).unwrap();
        assert_eq!(format.type_, glow::FLOAT);
        assert_eq!(format.components, 4);
    }

    #[test]
    fn rejects_non_float_formats() {
        assert!(matches!(
            detect_texture_format(glow::RGBA8),
            Err(Problem::UnsupportedTextureFormat)
        ));
    }

    #[test]
    fn two_swaps_restore_the_read_write_assignment() {
        let index = Cell::new(0);

        index.set(other(index.get()));
        assert_eq!(index.get(), 1);

        index.set(other(index.get()));
        assert_eq!(index.get(), 0);
    }

    #[test]
    fn read_and_write_never_alias() {
        assert_ne!(other(0), 0);
        assert_ne!(other(1), 1);
    }

    #[test]
    fn default_texture_options_clamp_and_snap_to_cells() {
        let options = TextureOptions::default();
        assert_eq!(options.mag_filter, glow::NEAREST);
        assert_eq!(options.min_filter, glow::NEAREST);
        assert_eq!(options.wrap_s, glow::CLAMP_TO_EDGE);
        assert_eq!(options.wrap_t, glow::CLAMP_TO_EDGE);
        assert_eq!(options.format, glow::RGBA16F);
    }
}
