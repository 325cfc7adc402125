//! CPU affinity for pool worker threads.
//!
//! A pinned worker keeps its slice of the output columns in one core's
//! caches, which makes the stride vs chunk comparison reproducible.
//!
//! Implemented manually using libc on Linux; macOS only has affinity hints,
//! so pinning reports failure there and workers float freely.

// ============================================================================
// Linux implementation using libc
// ============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use std::cell::RefCell;

    thread_local! {
        static ORIGINAL_AFFINITY: RefCell<Option<libc::cpu_set_t>> = const { RefCell::new(None) };
    }

    pub fn get_core_ids() -> Option<Vec<usize>> {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
                return None;
            }
            // Only cores this process may actually run on
            let cores: Vec<usize> = (0..libc::CPU_SETSIZE as usize)
                .filter(|&core| libc::CPU_ISSET(core, &set))
                .collect();
            (!cores.is_empty()).then_some(cores)
        }
    }

    pub fn get_current_cpu() -> Option<usize> {
        let cpu = unsafe { libc::sched_getcpu() };
        (cpu >= 0).then_some(cpu as usize)
    }

    pub fn save_affinity() -> bool {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) == 0 {
                ORIGINAL_AFFINITY.with(|cell| *cell.borrow_mut() = Some(set));
                true
            } else {
                false
            }
        }
    }

    pub fn set_affinity(core_id: usize) -> bool {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(core_id, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
        }
    }

    pub fn restore_affinity() -> bool {
        ORIGINAL_AFFINITY.with(|cell| match cell.borrow_mut().take() {
            Some(set) => unsafe {
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
            },
            None => false,
        })
    }
}

// ============================================================================
// Everything else: core count only, no pinning
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod platform {
    pub fn get_core_ids() -> Option<Vec<usize>> {
        let n = num_cpus::get();
        (n > 0).then(|| (0..n).collect())
    }

    pub fn get_current_cpu() -> Option<usize> {
        None
    }

    pub fn save_affinity() -> bool {
        true
    }

    pub fn set_affinity(_core_id: usize) -> bool {
        false
    }

    pub fn restore_affinity() -> bool {
        true
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Cores the current process may run on.
pub fn get_core_ids() -> Option<Vec<usize>> {
    platform::get_core_ids()
}

/// Core the calling thread is running on right now.
pub fn get_current_cpu() -> Option<usize> {
    platform::get_current_cpu()
}

/// Core for worker `index`, cycling over the allowed cores.
pub fn core_for_worker(index: usize) -> Option<usize> {
    let cores = get_core_ids()?;
    cores.get(index % cores.len()).copied()
}

/// RAII guard for CPU pinning - pins on creation, restores the original mask on drop.
///
/// # Example
/// ```ignore
/// {
///     let _pin = CpuPinGuard::with_core(2); // thread pinned to core 2
///     // ... run jobs ...
/// } // original affinity restored here
/// ```
pub struct CpuPinGuard {
    pinned_core: Option<usize>,
}

impl CpuPinGuard {
    /// Pin the calling thread to `core_id`.
    pub fn with_core(core_id: usize) -> Self {
        platform::save_affinity();
        let success = platform::set_affinity(core_id);
        if !success {
            log::debug!("could not pin thread to core {core_id}");
        }
        Self {
            pinned_core: success.then_some(core_id),
        }
    }

    pub fn core_id(&self) -> Option<usize> {
        self.pinned_core
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_core.is_some()
    }
}

impl Drop for CpuPinGuard {
    fn drop(&mut self) {
        if self.pinned_core.is_some() {
            platform::restore_affinity();
        }
    }
}
