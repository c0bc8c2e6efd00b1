//! Build script for denoise-rt
//!
//! With the `onnx` feature, makes sure an ONNX Runtime release for the target
//! is unpacked next to the manifest and exports its `lib` directory as
//! `DENOISE_ORT_LIB_DIR`. `ort_backend` loads the runtime from there by full
//! path when `ORT_DYLIB_PATH` is not set. The `cuda` feature selects the GPU
//! package on the platforms that have one. Without `onnx` there is nothing to
//! do: the pipeline itself has no native deps.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

const ORT_VERSION: &str = "1.23.2";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_ONNX");
    if env::var_os("CARGO_FEATURE_ONNX").is_none() {
        return;
    }
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_CUDA");

    let Some(manifest_dir) = env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from) else {
        println!("cargo:warning=CARGO_MANIFEST_DIR is not set, skipping ONNX Runtime setup");
        return;
    };
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let gpu = env::var_os("CARGO_FEATURE_CUDA").is_some();

    let Some(package) = package_name(&os, &arch, gpu) else {
        println!(
            "cargo:warning=No ONNX Runtime {} package for {}-{}; set ORT_DYLIB_PATH at run time",
            ORT_VERSION, os, arch
        );
        return;
    };

    let lib_dir = manifest_dir.join(&package).join("lib");
    if !lib_dir.exists() {
        println!("cargo:warning=ONNX Runtime not found, downloading {}", package);
        if let Err(e) = fetch(&package, &os, &manifest_dir) {
            println!("cargo:warning=Failed to download ONNX Runtime: {}", e);
            println!("cargo:warning=Unpack {} next to Cargo.toml or set ORT_DYLIB_PATH", package);
            return;
        }
    }
    println!("cargo:rustc-env=DENOISE_ORT_LIB_DIR={}", lib_dir.display());
}

/// Release package for a target, e.g. `onnxruntime-linux-x64-gpu-1.23.2`.
fn package_name(os: &str, arch: &str, gpu: bool) -> Option<String> {
    let platform = match (os, arch) {
        ("windows", "x86_64") => "win-x64",
        ("windows", "aarch64") => "win-arm64",
        ("linux", "x86_64") => "linux-x64",
        ("linux", "aarch64") => "linux-aarch64",
        ("macos", "x86_64") => "osx-x64",
        ("macos", "aarch64") => "osx-arm64",
        _ => return None,
    };
    // GPU builds are published for x64 Windows and Linux only.
    let variant = if gpu && matches!(platform, "win-x64" | "linux-x64") {
        "-gpu"
    } else {
        ""
    };
    Some(format!("onnxruntime-{}{}-{}", platform, variant, ORT_VERSION))
}

fn fetch(package: &str, os: &str, dest: &Path) -> io::Result<()> {
    let ext = if os == "windows" { "zip" } else { "tgz" };
    let url = format!(
        "https://github.com/microsoft/onnxruntime/releases/download/v{}/{}.{}",
        ORT_VERSION, package, ext
    );
    let archive = dest.join(format!("{}.{}", package, ext));

    run(Command::new("curl").arg("-fL").arg("-o").arg(&archive).arg(&url))?;
    // bsdtar (Windows 10+, macOS) unpacks zip as well as tgz.
    let unpacked = run(Command::new("tar").arg("-xf").arg(&archive).arg("-C").arg(dest));
    let _ = fs::remove_file(&archive);
    unpacked?;

    if !dest.join(package).exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} missing after extraction", package),
        ));
    }
    Ok(())
}

fn run(command: &mut Command) -> io::Result<()> {
    let status = command.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{:?} failed with {}", command, status),
        ))
    }
}
