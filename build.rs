//! Build script to detect the C toolchain used for runtime compilation.

use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(jit_toolchain_detected)");
    println!("cargo:rerun-if-env-changed=CC");
    println!("cargo:rerun-if-env-changed=GENERIC_JIT_CC");

    let build = cc::Build::new();
    let compiler = match build.try_get_compiler() {
        Ok(compiler) => compiler,
        Err(e) => {
            println!("cargo:warning=No C compiler detected ({e}). Runtime compilation will fall back to `cc` on PATH.");
            return;
        }
    };

    if compiler.is_like_msvc() {
        // The generated kernels rely on gcc-style flags and dlopen.
        println!("cargo:warning=MSVC detected. Runtime compilation requires a GCC-like toolchain.");
        return;
    }

    let compiler_name = if compiler.is_like_clang() {
        let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        if target_os == "macos" {
            "Apple Clang"
        } else {
            "Clang"
        }
    } else if compiler.is_like_gnu() {
        "GCC"
    } else {
        "Unknown"
    };

    println!("cargo:rustc-cfg=jit_toolchain_detected");
    println!("cargo:rustc-env=C_COMPILER_NAME={}", compiler_name);
    println!(
        "cargo:rustc-env=GENERIC_JIT_DEFAULT_CC={}",
        compiler.path().display()
    );
}
