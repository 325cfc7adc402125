//! C translation unit emission.
//!
//! The snippet becomes the body of a `static inline` scalar function; an
//! exported kernel loops over an index range and applies it column-wise.

use std::fmt::Write;

use crate::types::Signature;

/// Exported symbol resolved after loading.
pub const KERNEL_SYMBOL: &str = "jit_kernel";

/// Bumped whenever the emitted kernel ABI changes; part of every cache key.
pub const KERNEL_ABI_VERSION: u32 = 1;

/// Native kernel signature: `(inputs, output, start, end, step)`.
pub type KernelFn = unsafe extern "C" fn(*const *const std::ffi::c_void, *mut std::ffi::c_void, i64, i64, i64);

/// Emit the full translation unit for `body` with `signature`.
pub fn translation_unit(signature: &Signature, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 512);

    out.push_str("#include <stdint.h>\n#include <math.h>\n\n");

    // scalar function
    let _ = write!(out, "static inline {} jit_fn(", signature.ret().c_name());
    if signature.params().is_empty() {
        out.push_str("void");
    }
    for (i, param) in signature.params().iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{} {}", param.ty.c_name(), param.name);
    }
    out.push_str(")\n{\n#line 1 \"snippet\"\n");
    out.push_str(body);
    out.push_str("\n}\n#line 1 \"kernel\"\n\n");

    // kernel
    let _ = writeln!(
        out,
        "__attribute__((visibility(\"default\")))\nvoid {KERNEL_SYMBOL}(const void *const *jit_in, void *jit_out, int64_t jit_start, int64_t jit_end, int64_t jit_step)\n{{"
    );
    for (i, param) in signature.params().iter().enumerate() {
        let ty = param.ty.c_name();
        let _ = writeln!(out, "    const {ty} *jit_a{i} = (const {ty} *)jit_in[{i}];");
    }
    if signature.params().is_empty() {
        out.push_str("    (void)jit_in;\n");
    }
    let ret = signature.ret().c_name();
    let _ = writeln!(out, "    {ret} *jit_dst = ({ret} *)jit_out;");
    out.push_str("    for (int64_t jit_i = jit_start; jit_i < jit_end; jit_i += jit_step) {\n");
    out.push_str("        jit_dst[jit_i] = jit_fn(");
    for i in 0..signature.arity() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "jit_a{i}[jit_i]");
    }
    out.push_str(");\n    }\n}\n");

    out
}
