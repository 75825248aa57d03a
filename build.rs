// Build script to compile the triangle GLSL shaders to SPIR-V
//
// The renderer changes into its executable's directory at startup and loads
// shaders/vert.spv, shaders/frag.spv and config.toml from there, so all three
// are written next to the binary (target/<profile>/). Without glslc the build
// still succeeds and the .spv files have to be produced by hand.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");
    println!("cargo:rerun-if-changed=config.toml");

    let runtime_dir = runtime_dir();
    println!("cargo:rustc-env=TRI_RENDERER_RUNTIME_DIR={}", runtime_dir.display());

    let shader_dir = runtime_dir.join("shaders");
    if let Err(e) = fs::create_dir_all(&shader_dir) {
        panic!("Failed to create {}: {}", shader_dir.display(), e);
    }

    compile_shader("shaders/triangle.vert", &shader_dir.join("vert.spv"));
    compile_shader("shaders/triangle.frag", &shader_dir.join("frag.spv"));

    if let Err(e) = fs::copy("config.toml", runtime_dir.join("config.toml")) {
        println!("cargo:warning=could not copy config.toml next to the binary: {}", e);
    }
}

/// target/<profile>/, found from OUT_DIR = target/<profile>/build/<pkg>-<hash>/out
fn runtime_dir() -> PathBuf {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|e| panic!("OUT_DIR: {}", e)));
    match out_dir.ancestors().nth(3) {
        Some(dir) => dir.to_path_buf(),
        None => panic!("Unexpected OUT_DIR layout: {}", out_dir.display()),
    }
}

fn compile_shader(input: &str, output: &Path) {
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output.display());
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!(
                "cargo:warning=compile manually: glslc {} -o {}",
                input,
                output.display()
            );
        }
    }
}
