use std::io::prelude::*;
use std::{env, error::Error, fs, fs::File, path::Path};

// Specify the correct GLSL version in the shaders at build time.
fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = env::var_os("OUT_DIR").unwrap();
    let target = env::var("TARGET").unwrap();
    let shader_files = fs::read_dir("shaders")?;

    let version = match target.as_str() {
        "wasm32-unknown-unknown" => "300 es",
        "aarch64-apple-darwin" | "x86_64-apple-darwin" => "330",
        _ => "460",
    };

    fs::create_dir_all(Path::new(&out_dir).join("shaders"))?;

    for shader_file in shader_files.flatten() {
        let path = shader_file.path();
        let mut shader_source = File::open(&path)?;

        let mut versioned_source = format!("#version {}\n", version);
        shader_source.read_to_string(&mut versioned_source)?;

        let dest_path = Path::new(&out_dir).join(&path);
        fs::write(&dest_path, versioned_source.as_bytes())?;
    }

    println!("cargo:rerun-if-changed=shaders");

    Ok(())
}
