// build.rs
// Compiles the GLSL sources under resources/shaders into SPIR-V

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 6] = ["vert", "geom", "frag", "comp", "tesc", "tese"];

/// Output name for a shader source: `layered.geom` becomes `layered_geom.spv`
fn output_name(source: &Path) -> Option<String> {
    let stem = source.file_stem()?.to_str()?;
    let stage = source.extension()?.to_str()?;
    SHADER_STAGES
        .contains(&stage)
        .then(|| format!("{stem}_{stage}.spv"))
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    match (std::fs::metadata(source), std::fs::metadata(output)) {
        (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
            (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
            _ => true,
        },
        _ => true,
    }
}

fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &Path) -> usize {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            compiled += compile_shaders(&path, target_dir, glslc);
            continue;
        }

        let Some(name) = output_name(&path) else {
            continue;
        };
        let out_file = target_dir.join(name);

        if !needs_compile(&path, &out_file) {
            eprintln!("info: Shader {:?} is up to date", path.file_name().unwrap_or_default());
            continue;
        }

        let status = Command::new(glslc)
            .arg("-I")
            .arg(shader_dir)
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {:?} -> {:?}", path, out_file);
                compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {:?} with exit code: {}", path, s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", path, e),
        }
    }
    compiled
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        eprintln!("hint: Install Vulkan SDK and set VULKAN_SDK environment variable");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        PathBuf::from(&vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        PathBuf::from(&vulkan_sdk).join("bin").join("glslc")
    };
    if !glslc.exists() {
        panic!("glslc not found at: {:?}", glslc);
    }

    // Build scripts run from the package directory; shaders land in the workspace target
    let shader_dir = PathBuf::from("resources/shaders");
    let target_dir = PathBuf::from("../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create target directory: {}", e);
        return;
    }

    let compiled = compile_shaders(&shader_dir, &target_dir, &glslc);
    if compiled > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
