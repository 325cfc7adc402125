//! Tests for the snippet compiler that drive the real C toolchain.

#[cfg(test)]
mod tests {
    use crate::buffers::Buffers;
    use crate::compiler::{self, Compiler};
    use crate::config::{CompilerConfig, DEFAULT_CC};
    use crate::dispatch::apply;
    use crate::error::JitError;
    use crate::types::Signature;
    use crate::utils::{init_test_logging, toolchain_available};

    fn compiler_with(config: CompilerConfig) -> Option<Compiler> {
        if !toolchain_available() {
            eprintln!("skipping: no C toolchain detected at build time");
            return None;
        }
        init_test_logging();
        Some(Compiler::new(config).unwrap())
    }

    fn compiler() -> Option<Compiler> {
        compiler_with(CompilerConfig::default())
    }

    fn square_sig() -> Signature {
        Signature::parse(&[("double", "x")], "double").unwrap()
    }

    fn squares(compiler: &Compiler, source: &str) -> Vec<f64> {
        let f = compiler.compile(source, &square_sig()).unwrap();
        let mut buffers = Buffers::in_place(vec![0.0f64, 1.0, 2.0, 3.0]);
        apply(&f, &mut buffers, 0, 4).unwrap();
        buffers.output_as::<f64>().unwrap().to_vec()
    }

    #[test]
    fn test_square_snippet() {
        let Some(compiler) = compiler() else { return };
        assert_eq!(squares(&compiler, "return x*x;"), vec![0.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_expression_snippet() {
        let Some(compiler) = compiler() else { return };
        assert_eq!(squares(&compiler, "x * x"), vec![0.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_expression_with_trailing_comment() {
        let Some(compiler) = compiler() else { return };
        assert_eq!(squares(&compiler, "x * x // square"), vec![0.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_math_library_available() {
        let Some(compiler) = compiler() else { return };
        assert_eq!(squares(&compiler, "return fabs(x) * x;"), vec![0.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_cache_hit_returns_same_artifact() {
        let Some(compiler) = compiler() else { return };
        let a = compiler.compile("return x + 1;", &square_sig()).unwrap();
        let b = compiler.compile("return x + 1;", &square_sig()).unwrap();
        assert!(a.same_artifact(&b));
        assert_eq!(a.key(), b.key());

        let stats = compiler.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);

        // a different signature is a different artifact
        let float_sig = Signature::parse(&[("float", "x")], "float").unwrap();
        let c = compiler.compile("return x + 1;", &float_sig).unwrap();
        assert!(!a.same_artifact(&c));
        assert_eq!(compiler.stats().entries, 2);
    }

    #[test]
    fn test_eviction_respects_capacity() {
        let Some(compiler) = compiler_with(CompilerConfig {
            cache_capacity: 1,
            ..CompilerConfig::default()
        }) else {
            return;
        };

        let first = compiler.compile("return x;", &square_sig()).unwrap();
        let second = compiler.compile("return -x;", &square_sig()).unwrap();
        let stats = compiler.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 1);

        // evicted handles stay usable
        let mut buffers = Buffers::in_place(vec![2.0f64]);
        apply(&first, &mut buffers, 0, 1).unwrap();
        assert_eq!(buffers.output_as::<f64>(), Some(&[2.0][..]));

        let again = compiler.compile("return x;", &square_sig()).unwrap();
        assert!(!again.same_artifact(&first));
        assert!(!again.same_artifact(&second));
        assert_eq!(compiler.stats().misses, 3);
    }

    #[test]
    fn test_invalidate_and_evict() {
        let Some(compiler) = compiler() else { return };
        let a = compiler.compile("return x;", &square_sig()).unwrap();
        compiler.compile("return 2*x;", &square_sig()).unwrap();

        assert!(compiler.evict(&a.key()));
        assert!(!compiler.evict(&a.key()));
        assert_eq!(compiler.invalidate_all(), 1);
        assert_eq!(compiler.stats().entries, 0);
    }

    #[test]
    fn test_toolchain_diagnostic_points_into_snippet() {
        let Some(compiler) = compiler() else { return };
        let err = compiler.compile("return x * ;", &square_sig()).unwrap_err();
        match err {
            JitError::Compile { diagnostic } => {
                assert!(diagnostic.contains("snippet"), "{diagnostic}");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
        assert_eq!(compiler.stats().entries, 0);
    }

    #[test]
    fn test_missing_return_is_compile_error() {
        let Some(compiler) = compiler() else { return };
        let err = compiler.compile("double y = x * 2;", &square_sig()).unwrap_err();
        assert!(matches!(err, JitError::Compile { .. }), "{err:?}");
    }

    #[test]
    fn test_unbalanced_braces_fail_before_toolchain() {
        // Uses a program that cannot exist: the lexical check must fire first.
        let compiler = Compiler::new(CompilerConfig {
            program: "/nonexistent/generic-jit-cc".into(),
            ..CompilerConfig::default()
        })
        .unwrap();

        for source in [
            "if (x > 0) { return x;",
            "return x; }",
            "return (x;",
            "#include <stdio.h>\nreturn x;",
        ] {
            let err = compiler.compile(source, &square_sig()).unwrap_err();
            assert!(matches!(err, JitError::Compile { .. }), "{source}: {err:?}");
        }

        // A well-formed snippet reaches the toolchain and fails to launch it.
        let err = compiler.compile("return x;", &square_sig()).unwrap_err();
        assert!(matches!(err, JitError::Toolchain { .. }), "{err:?}");
    }

    #[test]
    fn test_emit_source() {
        let compiler = Compiler::new(CompilerConfig::default()).unwrap();
        let sig = Signature::parse(&[("double", "real"), ("double", "im")], "int").unwrap();
        let unit = compiler.emit_source("real + im", &sig).unwrap();
        assert!(unit.contains("#include <math.h>"));
        assert!(unit.contains("int32_t jit_fn(double real, double im)"));
        assert!(unit.contains("return (real + im\n);"));
        assert!(unit.contains("jit_kernel"));
    }

    #[test]
    fn test_disk_cache_shared_between_compilers() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompilerConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..CompilerConfig::default()
        };
        let Some(first) = compiler_with(config.clone()) else { return };
        assert_eq!(squares(&first, "return x*x;"), vec![0.0, 1.0, 4.0, 9.0]);
        assert_eq!(first.stats().disk_hits, 0);

        let second = Compiler::new(config).unwrap();
        assert_eq!(squares(&second, "return x*x;"), vec![0.0, 1.0, 4.0, 9.0]);
        assert_eq!(second.stats().disk_hits, 1);

        assert_eq!(second.purge_disk_cache().unwrap(), 1);
        assert_eq!(second.purge_disk_cache().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_compiles_share_one_artifact() {
        let Some(compiler) = compiler() else { return };
        let handles: Vec<_> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| s.spawn(|| compiler.compile("return x * 3;", &square_sig()).unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(handles.iter().all(|h| h.same_artifact(&handles[0])));
        assert_eq!(compiler.stats().entries, 1);
    }

    /// Write an executable shell script standing in for the C compiler.
    #[cfg(unix)]
    fn fake_toolchain(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-cc");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // A freshly written script can briefly be busy while another test thread forks.
    #[cfg(unix)]
    fn compile_with_fake(program: std::path::PathBuf, source: &str) -> JitError {
        let compiler = Compiler::new(CompilerConfig {
            program,
            ..CompilerConfig::default()
        })
        .unwrap();
        let mut err = compiler.compile(source, &square_sig()).unwrap_err();
        for _ in 0..5 {
            if !matches!(err, JitError::Toolchain { .. }) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            err = compiler.compile(source, &square_sig()).unwrap_err();
        }
        err
    }

    #[cfg(unix)]
    #[test]
    fn test_unloadable_artifact_is_load_error() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let program = fake_toolchain(
            dir.path(),
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then shift; printf 'not a shared object' > "$1"; fi
  shift
done"#,
        );

        match compile_with_fake(program, "return x;") {
            JitError::Load { path, reason } => {
                assert!(!reason.is_empty());
                assert!(path.to_string_lossy().contains("jit-"), "{}", path.display());
            }
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_kernel_symbol_is_load_error() {
        if !toolchain_available() {
            return;
        }
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let cc = DEFAULT_CC.unwrap_or("cc");
        let program = fake_toolchain(
            dir.path(),
            &format!("exec '{cc}' -Djit_kernel=jit_renamed \"$@\""),
        );

        match compile_with_fake(program, "return x;") {
            JitError::Load { reason, .. } => assert!(reason.contains("jit_kernel"), "{reason}"),
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[test]
    fn test_global_compiler_built_once() {
        init_test_logging();
        let compilers: Vec<usize> = std::thread::scope(|s| {
            let callers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| compiler::global().unwrap() as *const Compiler as usize))
                .collect();
            callers.into_iter().map(|c| c.join().unwrap()).collect()
        });
        assert!(compilers.iter().all(|&c| c == compilers[0]));

        let err = compiler::init_global(CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, JitError::Config(_)), "{err:?}");
    }
}
