// build.rs
// Compiles GLSL shader sources to SPIR-V for the shader store

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 6] = ["vert", "frag", "comp", "geom", "tesc", "tese"];

fn main() {
    println!("cargo:rerun-if-changed=../../resources/shaders");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: SKIP_SHADERS set, not compiling shaders");
        return;
    }

    let Some(glslc) = locate_glslc() else {
        eprintln!("warning: glslc not available, shader compilation skipped");
        eprintln!("hint: install the Vulkan SDK and set VULKAN_SDK");
        return;
    };

    let source_dir = PathBuf::from("../../resources/shaders");
    let output_dir = PathBuf::from("../../target/shaders");

    let entries = match fs::read_dir(&source_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: no shader sources at {}", source_dir.display());
            return;
        }
    };

    if let Err(e) = fs::create_dir_all(&output_dir) {
        eprintln!("warning: cannot create {}: {}", output_dir.display(), e);
        return;
    }

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext));
        let Some(stem) = path.file_stem() else { continue };
        if !is_shader {
            continue;
        }

        let spv = output_dir.join(stem).with_extension("spv");
        if is_up_to_date(&path, &spv) {
            continue;
        }

        match Command::new(&glslc).arg(&path).arg("-o").arg(&spv).status() {
            Ok(status) if status.success() => {
                eprintln!("info: compiled {} -> {}", path.display(), spv.display());
                compiled += 1;
            }
            Ok(status) => panic!(
                "glslc failed for {} with exit code {}",
                path.display(),
                status.code().unwrap_or(-1)
            ),
            Err(e) => panic!("failed to run glslc for {}: {}", path.display(), e),
        }
    }

    eprintln!("info: {} shader(s) compiled", compiled);
}

fn locate_glslc() -> Option<PathBuf> {
    let sdk = env::var("VULKAN_SDK").ok()?;
    let glslc = if cfg!(target_os = "windows") {
        Path::new(&sdk).join("Bin").join("glslc.exe")
    } else {
        Path::new(&sdk).join("bin").join("glslc")
    };
    glslc.exists().then_some(glslc)
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => dst >= src,
        _ => false,
    }
}
