//! Driver for the external C toolchain.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use crate::config::CompilerConfig;
use crate::error::{JitError, Result};

/// A C compiler invocation template.
#[derive(Clone, Debug)]
pub struct Toolchain {
    program: PathBuf,
    flags: Vec<String>,
}

impl Toolchain {
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            program: config.program.clone(),
            flags: config.flags(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Compile `source` into the shared object `output`.
    ///
    /// A non-zero exit becomes [`JitError::Compile`] carrying the raw diagnostics.
    pub fn build_shared(&self, source: &Path, output: &Path) -> Result<()> {
        let started = Instant::now();
        let result = Command::new(&self.program)
            .args(&self.flags)
            .arg("-o")
            .arg(output)
            .arg(source)
            .arg("-lm")
            .output();

        let output_status = match result {
            Ok(out) => out,
            Err(source) => {
                log::warn!("could not launch {}: {}", self.program.display(), source);
                return Err(JitError::Toolchain {
                    program: self.program.display().to_string(),
                    source,
                });
            }
        };

        log::debug!(
            "{} exited with {} after {:?}",
            self.program.display(),
            output_status.status,
            started.elapsed()
        );

        if output_status.status.success() {
            return Ok(());
        }

        let mut diagnostic = String::from_utf8_lossy(&output_status.stderr).into_owned();
        if diagnostic.trim().is_empty() {
            diagnostic = String::from_utf8_lossy(&output_status.stdout).into_owned();
        }
        if diagnostic.trim().is_empty() {
            diagnostic = format!("{} exited with {}", self.program.display(), output_status.status);
        }
        Err(JitError::compile(diagnostic))
    }
}
