// Build script to compile GLSL shaders to SPIR-V

use std::fs;
use std::path::Path;
use std::process::Command;

const SHADERS: [(&str, &str); 2] = [
    ("shaders/triangle.vert", "assets/shaders/vert.spv"),
    ("shaders/triangle.frag", "assets/shaders/frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    if let Err(e) = fs::create_dir_all("assets/shaders") {
        println!("cargo:warning=Failed to create assets/shaders: {}", e);
        return;
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            // Not fatal: the binary reports the missing blob at startup
            println!("cargo:warning=glslc not found ({}), {} not compiled", e, input);
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output);
        }
    }
}
