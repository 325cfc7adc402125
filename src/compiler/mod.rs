//! # Snippet Compiler
//!
//! Turns a scalar C snippet plus a typed signature into a [`FunctionHandle`]:
//!
//! 1. lexical checks on the snippet ([`snippet`])
//! 2. translation unit emission ([`codegen`])
//! 3. shared object build through the system toolchain ([`toolchain`])
//! 4. `dlopen` + symbol lookup, memoized by content hash ([`cache`])
//!
//! Compiling is expensive and invoking is cheap, so handles are meant to be
//! created once and reused. Identical requests are served from the cache.

pub mod cache;
pub mod codegen;
pub mod snippet;
pub mod toolchain;
#[cfg(test)]
mod test;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use libloading::Library;
use parking_lot::Mutex;

use crate::config::CompilerConfig;
use crate::error::{ConfigError, JitError, Result};
use crate::types::Signature;
use cache::{ArtifactCache, ArtifactKey, CacheStats, ARTIFACT_PREFIX};
use codegen::{KernelFn, KERNEL_SYMBOL};
use toolchain::Toolchain;

/// A loaded shared object and its resolved kernel.
struct Artifact {
    kernel: KernelFn,
    signature: Signature,
    key: ArtifactKey,
    path: PathBuf,
    // Dropped last; `kernel` points into it.
    _library: Library,
}

impl Drop for Artifact {
    fn drop(&mut self) {
        log::debug!("unloading artifact {}", self.key.short_hex());
    }
}

/// Reusable reference to a compiled function.
///
/// Cloning is cheap. The native code stays loaded while any clone (or the
/// compiler's cache) is alive, and it can be invoked from many threads at once.
#[derive(Clone)]
pub struct FunctionHandle {
    artifact: Arc<Artifact>,
}

impl FunctionHandle {
    pub fn signature(&self) -> &Signature {
        &self.artifact.signature
    }

    pub fn key(&self) -> ArtifactKey {
        self.artifact.key
    }

    /// Where the shared object was loaded from (it may no longer exist).
    pub fn path(&self) -> &Path {
        &self.artifact.path
    }

    /// Whether both handles share the same loaded artifact.
    pub fn same_artifact(&self, other: &FunctionHandle) -> bool {
        Arc::ptr_eq(&self.artifact, &other.artifact)
    }

    pub(crate) fn kernel(&self) -> KernelFn {
        self.artifact.kernel
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandle")
            .field("signature", &self.artifact.signature.to_string())
            .field("key", &self.artifact.key.short_hex())
            .finish()
    }
}

/// Compiles snippets and owns the artifact cache.
pub struct Compiler {
    config: CompilerConfig,
    toolchain: Toolchain,
    cache: ArtifactCache<FunctionHandle>,
    build_lock: Mutex<()>,
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("config", &self.config)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = &config.cache_dir {
            std::fs::create_dir_all(dir)?;
        }
        log::debug!(
            "compiler ready: program={}, cache capacity={}, cache dir={:?}",
            config.program.display(),
            config.cache_capacity,
            config.cache_dir
        );
        Ok(Self {
            toolchain: Toolchain::from_config(&config),
            cache: ArtifactCache::new(config.cache_capacity),
            build_lock: Mutex::new(()),
            config,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CompilerConfig::from_env()?)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `source` as the body of a function with `signature`.
    pub fn compile(&self, source: &str, signature: &Signature) -> Result<FunctionHandle> {
        let kind = snippet::check(source)?;
        let key = ArtifactKey::compute(signature, source, &self.toolchain);

        if let Some(handle) = self.cache.get(&key) {
            log::debug!("artifact cache hit {}", key.short_hex());
            return Ok(handle);
        }

        // One build at a time; a concurrent caller may have finished ours meanwhile.
        let _guard = self.build_lock.lock();
        if let Some(handle) = self.cache.touch(&key) {
            return Ok(handle);
        }

        let started = Instant::now();
        let unit = codegen::translation_unit(signature, &snippet::body(source, kind));
        let artifact = match &self.config.cache_dir {
            Some(dir) => self.build_persistent(dir, key, &unit, signature)?,
            None => self.build_transient(key, &unit, signature)?,
        };
        log::debug!(
            "compiled {} {} in {:?}",
            key.short_hex(),
            signature,
            started.elapsed()
        );

        let handle = FunctionHandle {
            artifact: Arc::new(artifact),
        };
        if let Some((evicted, _)) = self.cache.insert(key, handle.clone()) {
            log::debug!("evicted artifact {} from memory cache", evicted.short_hex());
        }
        Ok(handle)
    }

    /// Compile with C type spellings, e.g. `[("double", "x")]` returning `"double"`.
    pub fn compile_parsed(
        &self,
        source: &str,
        params: &[(&str, &str)],
        ret: &str,
    ) -> Result<FunctionHandle> {
        let signature = Signature::parse(params, ret)?;
        self.compile(source, &signature)
    }

    /// The translation unit that [`compile`](Self::compile) would build.
    pub fn emit_source(&self, source: &str, signature: &Signature) -> Result<String> {
        let kind = snippet::check(source)?;
        Ok(codegen::translation_unit(signature, &snippet::body(source, kind)))
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Forget every cached artifact. Outstanding handles stay valid.
    pub fn invalidate_all(&self) -> usize {
        let removed = self.cache.clear();
        log::debug!("invalidated {removed} cached artifact(s)");
        removed
    }

    /// Forget one cached artifact. Outstanding handles stay valid.
    pub fn evict(&self, key: &ArtifactKey) -> bool {
        self.cache.remove(key).is_some()
    }

    /// Delete persisted artifacts from the cache directory.
    pub fn purge_disk_cache(&self) -> Result<usize> {
        let Some(dir) = &self.config.cache_dir else {
            return Ok(0);
        };
        let pattern = dir.join(format!("{ARTIFACT_PREFIX}*.{}", std::env::consts::DLL_EXTENSION));
        let pattern = pattern.to_string_lossy().into_owned();
        let entries = glob::glob(&pattern).map_err(|e| ConfigError::InvalidSetting {
            key: "cache_dir".to_string(),
            value: e.to_string(),
        })?;

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            std::fs::remove_file(&entry)?;
            removed += 1;
        }
        log::debug!("purged {removed} artifact(s) from {}", dir.display());
        Ok(removed)
    }

    /// Build in temporary files that are gone once this returns, success or not.
    fn build_transient(&self, key: ArtifactKey, unit: &str, signature: &Signature) -> Result<Artifact> {
        let prefix = format!("{ARTIFACT_PREFIX}{}-", key.short_hex());
        let mut source = tempfile::Builder::new().prefix(&prefix).suffix(".c").tempfile()?;
        source.write_all(unit.as_bytes())?;
        source.flush()?;

        let shared = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&format!(".{}", std::env::consts::DLL_EXTENSION))
            .tempfile()?;
        self.toolchain.build_shared(source.path(), shared.path())?;
        load(shared.path(), key, signature)
    }

    /// Reuse `jit-<hash>` from the cache directory, building it first if missing.
    fn build_persistent(
        &self,
        dir: &Path,
        key: ArtifactKey,
        unit: &str,
        signature: &Signature,
    ) -> Result<Artifact> {
        let path = key.artifact_path(dir);
        if path.is_file() {
            match load(&path, key, signature) {
                Ok(artifact) => {
                    self.cache.record_disk_hit();
                    log::debug!("disk cache hit {}", path.display());
                    return Ok(artifact);
                }
                Err(e) => log::warn!("ignoring unusable cached artifact: {e}"),
            }
        }

        let prefix = format!("{ARTIFACT_PREFIX}{}-", key.short_hex());
        let mut source = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".c")
            .tempfile_in(dir)?;
        source.write_all(unit.as_bytes())?;
        source.flush()?;

        let shared = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        self.toolchain.build_shared(source.path(), shared.path())?;
        shared.persist(&path).map_err(|e| JitError::Io(e.error))?;
        load(&path, key, signature)
    }
}

fn load(path: &Path, key: ArtifactKey, signature: &Signature) -> Result<Artifact> {
    let load_error = |reason: String| JitError::Load {
        path: path.to_path_buf(),
        reason,
    };

    // SAFETY: the library was produced from our own translation unit, which has
    // no initializers beyond what libc runs for any shared object.
    let library = unsafe { Library::new(path) }.map_err(|e| load_error(e.to_string()))?;
    // SAFETY: KernelFn matches the prototype emitted by `codegen`.
    let kernel = unsafe { library.get::<KernelFn>(KERNEL_SYMBOL.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|e| load_error(format!("missing `{KERNEL_SYMBOL}`: {e}")))?;

    Ok(Artifact {
        kernel,
        signature: signature.clone(),
        key,
        path: path.to_path_buf(),
        _library: library,
    })
}

static GLOBAL: OnceLock<Compiler> = OnceLock::new();
// Held while the global is built so two first callers never both construct one.
static GLOBAL_INIT: Mutex<()> = parking_lot::const_mutex(());

/// Install the process-wide compiler. Fails if it already exists.
pub fn init_global(config: CompilerConfig) -> Result<&'static Compiler> {
    let _guard = GLOBAL_INIT.lock();
    if GLOBAL.get().is_some() {
        return Err(ConfigError::AlreadyInitialized("global compiler").into());
    }
    let compiler = Compiler::new(config)?;
    Ok(GLOBAL.get_or_init(|| compiler))
}

/// The process-wide compiler, created from the environment on first use.
pub fn global() -> Result<&'static Compiler> {
    if let Some(compiler) = GLOBAL.get() {
        return Ok(compiler);
    }
    let _guard = GLOBAL_INIT.lock();
    if let Some(compiler) = GLOBAL.get() {
        return Ok(compiler);
    }
    let compiler = Compiler::from_env()?;
    Ok(GLOBAL.get_or_init(|| compiler))
}
