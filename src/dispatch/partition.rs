//! Index-range partitioning across workers.
//!
//! Both policies split `[start, end)` into disjoint index sets whose union is
//! the whole range, so workers never write the same output element.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How an index range is split between workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartitionMode {
    /// Worker `k` takes `start+k, start+k+n, ...` (interleaved, poor locality).
    Strided,
    /// Worker `k` takes the `k`-th of `n` contiguous, nearly equal sub-ranges.
    Chunked,
}

impl PartitionMode {
    /// Numeric `chunk_mode` codes: 1 = stride, 2 = chunk.
    pub fn from_code(code: i64) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(PartitionMode::Strided),
            2 => Ok(PartitionMode::Chunked),
            other => Err(ConfigError::UnknownPartitionMode(other)),
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            PartitionMode::Strided => 1,
            PartitionMode::Chunked => 2,
        }
    }
}

impl fmt::Display for PartitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionMode::Strided => f.write_str("stride"),
            PartitionMode::Chunked => f.write_str("chunk"),
        }
    }
}

impl FromStr for PartitionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stride" | "strided" | "1" => Ok(PartitionMode::Strided),
            "chunk" | "chunked" | "chunks" | "2" => Ok(PartitionMode::Chunked),
            _ => Err(ConfigError::InvalidSetting {
                key: "partition mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// The indices a single worker is responsible for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexSet {
    /// `start..end`
    Range { start: usize, end: usize },
    /// `first, first+step, ...` below `end`
    Strided { first: usize, end: usize, step: usize },
}

impl IndexSet {
    /// `(first, end, step)` as consumed by the kernel loop.
    pub fn bounds(&self) -> (usize, usize, usize) {
        match *self {
            IndexSet::Range { start, end } => (start, end, 1),
            IndexSet::Strided { first, end, step } => (first, end, step),
        }
    }

    pub fn len(&self) -> usize {
        let (first, end, step) = self.bounds();
        if first >= end {
            0
        } else {
            (end - first).div_ceil(step)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let (first, end, step) = self.bounds();
        (first..end).step_by(step)
    }
}

/// Split `[start, end)` into exactly `workers` index sets.
///
/// Callers guarantee `start <= end` and `workers >= 1`. Sets may be empty
/// when there are more workers than indices.
pub fn partition(start: usize, end: usize, workers: usize, mode: PartitionMode) -> Vec<IndexSet> {
    debug_assert!(start <= end && workers >= 1);
    match mode {
        PartitionMode::Strided => (0..workers)
            .map(|k| IndexSet::Strided {
                first: start + k,
                end,
                step: workers,
            })
            .collect(),
        PartitionMode::Chunked => {
            let len = (end - start) as u128;
            let n = workers as u128;
            let boundary = |k: usize| start + (len * k as u128 / n) as usize;
            (0..workers)
                .map(|k| IndexSet::Range {
                    start: boundary(k),
                    end: boundary(k + 1),
                })
                .collect()
        }
    }
}
