//! Compiler and worker pool settings.
//!
//! Both configs have sensible defaults and can be overridden from the
//! environment:
//!
//! | Variable                     | Setting                                   |
//! |------------------------------|-------------------------------------------|
//! | `GENERIC_JIT_CC`, `CC`       | C toolchain program                       |
//! | `GENERIC_JIT_CFLAGS`         | extra toolchain flags (whitespace split)  |
//! | `GENERIC_JIT_CACHE_CAPACITY` | in-memory artifact cache capacity         |
//! | `GENERIC_JIT_CACHE_DIR`      | on-disk artifact cache directory          |
//! | `GENERIC_JIT_THREADS`        | worker pool size                          |
//! | `GENERIC_JIT_PIN`            | pin workers to cores (`1`/`0`)            |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Toolchain detected by the build script, if any.
pub const DEFAULT_CC: Option<&str> = option_env!("GENERIC_JIT_DEFAULT_CC");

/// Settings for [`Compiler`](crate::compiler::Compiler).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerConfig {
    /// C compiler program (default: build-time detected compiler, else `cc`)
    pub program: PathBuf,
    /// Pass `-ffast-math` (default: true)
    pub fast_math: bool,
    /// Pass `-march=native` on x86_64 (default: `native-arch` feature)
    pub native_arch: bool,
    /// Pass `-g` (default: false)
    pub debug_info: bool,
    /// Extra flags appended after the defaults
    pub extra_flags: Vec<String>,
    /// Number of artifacts kept loaded by the in-memory cache (default: 64)
    pub cache_capacity: usize,
    /// Directory for persisted artifacts; `None` keeps nothing on disk
    pub cache_dir: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_CC.unwrap_or("cc")),
            fast_math: true,
            native_arch: cfg!(feature = "native-arch"),
            debug_info: false,
            extra_flags: Vec::new(),
            cache_capacity: 64,
            cache_dir: None,
        }
    }
}

impl CompilerConfig {
    /// Defaults overridden by `GENERIC_JIT_*` / `CC` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(program) = var("GENERIC_JIT_CC").or_else(|| var("CC")) {
            config.program = PathBuf::from(program);
        }
        if let Some(flags) = var("GENERIC_JIT_CFLAGS") {
            config.extra_flags = flags.split_whitespace().map(str::to_string).collect();
        }
        if let Some(capacity) = parsed::<usize>("GENERIC_JIT_CACHE_CAPACITY")? {
            config.cache_capacity = capacity;
        }
        if let Some(dir) = var("GENERIC_JIT_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "cache_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        if self.program.as_os_str().is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "program".to_string(),
                value: String::new(),
            });
        }
        Ok(())
    }

    /// Full flag list passed to the toolchain, before the file arguments.
    pub fn flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = ["-shared", "-fPIC", "-O3", "-fvisibility=hidden", "-Werror=return-type"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if self.fast_math {
            flags.push("-ffast-math".to_string());
        }
        if self.native_arch && cfg!(target_arch = "x86_64") {
            flags.push("-march=native".to_string());
        }
        if self.debug_info {
            flags.push("-g".to_string());
        }
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }
}

/// Settings for [`WorkerPool`](crate::utils::pool::WorkerPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads (default: logical CPU count)
    pub threads: usize,
    /// Pin worker `i` to core `i % cores` (default: false)
    pub pin_workers: bool,
    /// Thread name prefix (default: `jit-worker`)
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            pin_workers: false,
            name_prefix: "jit-worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(threads) = parsed::<usize>("GENERIC_JIT_THREADS")? {
            config.threads = threads;
        }
        if let Some(pin) = var("GENERIC_JIT_PIN") {
            config.pin_workers = parse_flag("GENERIC_JIT_PIN", &pin)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "threads".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match var(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidSetting {
                key: key.to_string(),
                value,
            }),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
