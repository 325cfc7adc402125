//! Tests for serial and parallel dispatch.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use rand::Rng;

    use crate::buffers::Buffers;
    use crate::compiler::{Compiler, FunctionHandle};
    use crate::config::{CompilerConfig, PoolConfig};
    use crate::dispatch::scheduler::launch;
    use crate::dispatch::{
        apply, apply_strided, dispatch_parallel, join, partition, IndexSet, PartitionMode,
    };
    use crate::error::{ConfigError, JitError, RangeError};
    use crate::utils::pool::WorkerPool;
    use crate::utils::{init_test_logging, toolchain_available};

    const MODES: [PartitionMode; 2] = [PartitionMode::Strided, PartitionMode::Chunked];

    const MANDELBROT: &str = "int it=0;\
        double cr = real;\
        double ci = im;\
        double realsq = real*real;\
        double imsq = im*im;\
        for(it=0; it<1000; it++){\
            double newreal = realsq-imsq;\
            double newim = 2*real*im;\
            real = newreal+cr;\
            im = newim+ci;\
            realsq = real*real;\
            imsq = im*im;\
            if(realsq + imsq > 4.0){\
                return it;\
            }\
        }\
        return 1000;";

    const QUINTIC: &str = "return 10*x*x*x*x*x+4*x*x*x*x+x*x*x-20*x*x+3;";

    /// Strict IEEE evaluation so results match the Rust reference bit for bit.
    fn exact_compiler() -> Option<Compiler> {
        if !toolchain_available() {
            eprintln!("skipping: no C toolchain detected at build time");
            return None;
        }
        init_test_logging();
        Some(
            Compiler::new(CompilerConfig {
                fast_math: false,
                native_arch: false,
                extra_flags: vec!["-ffp-contract=off".to_string()],
                ..CompilerConfig::default()
            })
            .unwrap(),
        )
    }

    fn pool(threads: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::with_threads(threads)).unwrap()
    }

    fn square(compiler: &Compiler) -> FunctionHandle {
        compiler
            .compile_parsed("return x*x;", &[("double", "x")], "double")
            .unwrap()
    }

    fn run_parallel(
        pool: &WorkerPool,
        f: &FunctionHandle,
        buffers: Buffers,
        (start, end): (usize, usize),
        threads: usize,
        mode: PartitionMode,
    ) -> Buffers {
        join(dispatch_parallel(pool, f, buffers, start, end, threads, mode).unwrap()).unwrap()
    }

    fn mandelbrot_reference(mut real: f64, mut im: f64) -> i32 {
        let (cr, ci) = (real, im);
        let mut realsq = real * real;
        let mut imsq = im * im;
        for it in 0..1000 {
            let newreal = realsq - imsq;
            let newim = 2.0 * real * im;
            real = newreal + cr;
            im = newim + ci;
            realsq = real * real;
            imsq = im * im;
            if realsq + imsq > 4.0 {
                return it;
            }
        }
        1000
    }

    fn quintic_reference(x: f64) -> f64 {
        10.0 * x * x * x * x * x + 4.0 * x * x * x * x + x * x * x - 20.0 * x * x + 3.0
    }

    #[test]
    fn test_square_serial_and_parallel() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let expected = [0.0, 1.0, 4.0, 9.0];

        let mut serial = Buffers::in_place(vec![0.0f64, 1.0, 2.0, 3.0]);
        apply(&f, &mut serial, 0, 4).unwrap();
        assert_eq!(serial.output_as::<f64>(), Some(&expected[..]));

        let pool = pool(2);
        for mode in MODES {
            let batch = dispatch_parallel(
                &pool,
                &f,
                Buffers::in_place(vec![0.0f64, 1.0, 2.0, 3.0]),
                0,
                4,
                2,
                mode,
            )
            .unwrap();
            assert_eq!(batch.workers(), 2);
            let buffers = join(batch).unwrap();
            assert_eq!(buffers.output_as::<f64>(), Some(&expected[..]), "{mode}");
        }
    }

    #[test]
    fn test_one_thread_matches_serial() {
        let Some(compiler) = exact_compiler() else { return };
        let f = compiler.compile_parsed(QUINTIC, &[("double", "x")], "double").unwrap();
        let input: Vec<f64> = (0..257).map(|i| i as f64 / 64.0 - 2.0).collect();

        let mut serial = Buffers::new(vec![0.0f64; input.len()]).with_input(input.clone());
        apply(&f, &mut serial, 0, input.len()).unwrap();

        let pool = pool(1);
        for mode in MODES {
            let buffers = Buffers::new(vec![0.0f64; input.len()]).with_input(input.clone());
            let parallel = run_parallel(&pool, &f, buffers, (0, input.len()), 1, mode);
            assert_eq!(parallel, serial, "{mode}");
        }
    }

    #[test]
    fn test_mandelbrot_matches_reference() {
        let Some(compiler) = exact_compiler() else { return };
        let f = compiler
            .compile_parsed(MANDELBROT, &[("double", "real"), ("double", "im")], "int")
            .unwrap();

        let (w, h) = (40, 30);
        let xs: Vec<f64> = (0..w * h)
            .map(|i| -2.0 + 2.8 * (i / h) as f64 / w as f64)
            .collect();
        let ys: Vec<f64> = (0..w * h)
            .map(|i| -1.4 + 2.8 * (i % h) as f64 / h as f64)
            .collect();
        let expected: Vec<i32> = xs
            .iter()
            .zip(&ys)
            .map(|(&x, &y)| mandelbrot_reference(x, y))
            .collect();

        let pool = pool(4);
        for mode in MODES {
            let buffers = Buffers::new(vec![0i32; w * h])
                .with_input(xs.clone())
                .with_input(ys.clone());
            let joined = run_parallel(&pool, &f, buffers, (0, w * h), 4, mode);
            assert_eq!(joined.output_as::<i32>(), Some(&expected[..]), "{mode}");
        }
        // points inside the set never escape
        assert!(expected.contains(&1000));
    }

    #[test]
    fn test_quintic_in_place() {
        let Some(compiler) = exact_compiler() else { return };
        let f = compiler.compile_parsed(QUINTIC, &[("double", "x")], "double").unwrap();
        let input: Vec<f64> = (0..1000).map(|i| i as f64 / 500.0 - 1.0).collect();

        let pool = pool(3);
        let buffers = Buffers::in_place(input.clone());
        let out = run_parallel(&pool, &f, buffers, (0, 1000), 7, PartitionMode::Chunked)
            .into_output()
            .into_vec::<f64>()
            .unwrap();
        for (x, y) in input.iter().zip(&out) {
            let want = quintic_reference(*x);
            assert!((y - want).abs() <= 1e-9 * want.abs().max(1.0), "f({x}) = {y}, want {want}");
        }
    }

    #[test]
    fn test_two_input_binding() {
        let Some(compiler) = exact_compiler() else { return };
        let f = compiler
            .compile_parsed("a - 2 * b", &[("long", "a"), ("int64_t", "b")], "int64_t")
            .unwrap();
        let mut buffers = Buffers::new(vec![0i64; 4])
            .with_input(vec![10i64, 20, 30, 40])
            .with_input(vec![1i64, 2, 3, 4]);
        apply(&f, &mut buffers, 0, 4).unwrap();
        assert_eq!(buffers.output_as::<i64>(), Some(&[8, 16, 24, 32][..]));
    }

    #[test]
    fn test_handle_reuse_does_not_interfere() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);

        let mut a = Buffers::in_place(vec![1.0f64, 2.0]);
        let mut b = Buffers::in_place(vec![5.0f64, 6.0, 7.0]);
        apply(&f, &mut a, 0, 2).unwrap();
        apply(&f, &mut b, 0, 3).unwrap();
        apply(&f, &mut a, 0, 1).unwrap();

        assert_eq!(a.output_as::<f64>(), Some(&[1.0, 4.0][..]));
        assert_eq!(b.output_as::<f64>(), Some(&[25.0, 36.0, 49.0][..]));
    }

    #[test]
    fn test_sub_range_leaves_rest_untouched() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let pool = pool(2);
        for mode in MODES {
            let buffers = Buffers::in_place(vec![2.0f64; 10]);
            let out = run_parallel(&pool, &f, buffers, (3, 8), 3, mode);
            let expected: Vec<f64> = (0..10)
                .map(|i| if (3..8).contains(&i) { 4.0 } else { 2.0 })
                .collect();
            assert_eq!(out.output_as::<f64>(), Some(&expected[..]), "{mode}");
        }
    }

    #[test]
    fn test_apply_strided() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let mut buffers = Buffers::in_place(vec![3.0f64; 6]);
        apply_strided(&f, &mut buffers, 1, 6, 2).unwrap();
        assert_eq!(buffers.output_as::<f64>(), Some(&[3.0, 9.0, 3.0, 9.0, 3.0, 9.0][..]));

        let err = apply_strided(&f, &mut buffers, 0, 6, 0).unwrap_err();
        assert!(matches!(err, JitError::Config(ConfigError::InvalidSetting { .. })));
    }

    #[test]
    fn test_errors_before_any_work() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let pool = pool(2);

        let four = || Buffers::in_place(vec![1.0f64; 4]);
        let err = dispatch_parallel(&pool, &f, four(), 0, 5, 2, PartitionMode::Chunked).unwrap_err();
        assert!(matches!(err, JitError::Range(RangeError::OutOfBounds { end: 5, len: 4 })));

        let err = dispatch_parallel(&pool, &f, four(), 3, 2, 2, PartitionMode::Strided).unwrap_err();
        assert!(matches!(err, JitError::Range(RangeError::Inverted { start: 3, end: 2 })));

        let err = dispatch_parallel(&pool, &f, four(), 0, 4, 0, PartitionMode::Strided).unwrap_err();
        assert!(matches!(err, JitError::Range(RangeError::NoWorkers)));

        let mismatched = Buffers::new(vec![0.0f64; 4]).with_input(vec![1.0f64; 3]);
        let err = dispatch_parallel(&pool, &f, mismatched, 0, 3, 2, PartitionMode::Chunked)
            .unwrap_err();
        assert!(matches!(
            err,
            JitError::Range(RangeError::LengthMismatch { expected: 4, found: 3, .. })
        ));

        let mut wrong_type = Buffers::in_place(vec![1i32; 4]);
        let err = apply(&f, &mut wrong_type, 0, 4).unwrap_err();
        assert!(matches!(err, JitError::Config(ConfigError::OutputType { .. })));

        let mut wrong_arity = Buffers::new(vec![0.0f64; 4]);
        let err = apply(&f, &mut wrong_arity, 0, 4).unwrap_err();
        assert!(matches!(
            err,
            JitError::Config(ConfigError::ArityMismatch { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn test_empty_range_is_a_no_op() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let pool = pool(2);
        let buffers = Buffers::in_place(vec![5.0f64; 3]);
        let out = run_parallel(&pool, &f, buffers, (2, 2), 4, PartitionMode::Chunked);
        assert_eq!(out.output_as::<f64>(), Some(&[5.0, 5.0, 5.0][..]));
    }

    #[test]
    fn test_unjoined_batch_waits_on_drop() {
        let Some(compiler) = exact_compiler() else { return };
        let f = square(&compiler);
        let pool = pool(2);

        let big = Buffers::in_place(vec![1.5f64; 100_000]);
        let batch = dispatch_parallel(&pool, &f, big, 0, 100_000, 8, PartitionMode::Strided).unwrap();
        drop(batch);

        let small = Buffers::in_place(vec![1.5f64; 16]);
        let mut batch = dispatch_parallel(&pool, &f, small, 0, 16, 2, PartitionMode::Chunked).unwrap();
        while !batch.is_finished() {
            thread::yield_now();
        }
        let out = batch.join().unwrap();
        assert!(out.output_as::<f64>().unwrap().iter().all(|&v| v == 2.25));
    }

    #[test]
    fn test_first_worker_failure_after_all_finish() {
        init_test_logging();
        let pool = pool(2);
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|k| {
                let completed = Arc::clone(&completed);
                move || {
                    if k == 2 {
                        panic!("boom in task {k}");
                    }
                    thread::sleep(Duration::from_millis(10));
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();

        let batch = launch(&pool, Buffers::new(vec![0.0f64; 1]), tasks).unwrap();
        match batch.join() {
            Err(JitError::Worker { worker, message }) => {
                assert_eq!(worker, 2);
                assert!(message.contains("boom in task 2"), "{message}");
            }
            other => panic!("expected a worker error, got {other:?}"),
        }
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_batch_debug_shows_progress() {
        let pool = pool(1);
        let (release, gate) = crossbeam::channel::bounded::<()>(0);
        let tasks = vec![move || {
            let _ = gate.recv();
        }];
        let batch = launch(&pool, Buffers::new(vec![0i32]), tasks).unwrap();

        let shown = format!("{batch:?}");
        assert!(shown.starts_with("Batch"), "{shown}");
        assert!(shown.contains(&format!("id: {}", batch.id())), "{shown}");
        assert!(shown.contains("workers: 1"), "{shown}");
        assert!(shown.contains("outstanding: 1"), "{shown}");

        release.send(()).unwrap();
        join(batch).unwrap();
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let pool = pool(1);
        let noop = || {};
        let a = launch(&pool, Buffers::new(vec![0i32]), vec![noop]).unwrap();
        let b = launch(&pool, Buffers::new(vec![0i32]), vec![noop]).unwrap();
        assert_ne!(a.id(), b.id());
        join(a).unwrap();
        join(b).unwrap();
    }

    #[test]
    fn test_random_partitions_are_exact() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let start = rng.random_range(0..100usize);
            let end = start + rng.random_range(0..300usize);
            let workers = rng.random_range(1..17usize);

            for mode in MODES {
                let sets = partition(start, end, workers, mode);
                assert_eq!(sets.len(), workers);

                let mut seen: Vec<usize> = sets.iter().flat_map(IndexSet::iter).collect();
                assert_eq!(seen.len(), end - start, "{mode} {start}..{end}/{workers}");
                seen.sort_unstable();
                assert!(seen.iter().copied().eq(start..end), "{mode} {start}..{end}/{workers}");

                if mode == PartitionMode::Chunked {
                    let sizes: Vec<usize> = sets.iter().map(IndexSet::len).collect();
                    let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
                    assert!(max - min <= 1, "{sizes:?}");
                }
            }
        }
    }
}
