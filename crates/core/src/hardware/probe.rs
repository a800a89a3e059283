//! Resource Probe contract and the free-memory threshold decision.

use std::str::FromStr;

use crate::error::CoreError;

/// Bytes in one gibibyte.
pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Free accelerator memory required to run a generation inline.
pub const DEFAULT_MIN_FREE_VRAM_GIB: u64 = 24;

/// Decides whether a generation may run synchronously right now.
///
/// Implementations must re-query device state on every call: concurrent
/// jobs consume memory, so the answer is never cached.
pub trait ResourceProbe: Send + Sync {
    fn has_sufficient_resources(&self) -> bool;
}

/// Strict lower bound on free device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryThreshold {
    min_free_bytes: u64,
}

impl MemoryThreshold {
    pub fn from_bytes(min_free_bytes: u64) -> Self {
        Self { min_free_bytes }
    }

    pub fn from_gib(gib: u64) -> Self {
        Self::from_bytes(gib.saturating_mul(BYTES_PER_GIB))
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// `free` is `None` when no device is present, which never qualifies.
    pub fn is_satisfied_by(&self, free: Option<u64>) -> bool {
        matches!(free, Some(bytes) if bytes > self.min_free_bytes)
    }
}

impl Default for MemoryThreshold {
    fn default() -> Self {
        Self::from_gib(DEFAULT_MIN_FREE_VRAM_GIB)
    }
}

/// A probe that always gives the same answer.
///
/// Backs the `immediate` / `deferred` execution-mode overrides.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl ResourceProbe for StaticProbe {
    fn has_sufficient_resources(&self) -> bool {
        self.0
    }
}

/// How the server chooses between inline and background execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Ask the device probe on every request.
    #[default]
    Auto,
    /// Always run inline.
    Immediate,
    /// Always defer to the background.
    Deferred,
}

impl FromStr for ExecutionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "immediate" => Ok(Self::Immediate),
            "deferred" => Ok(Self::Deferred),
            other => Err(CoreError::Validation(format!(
                "Unknown execution mode '{other}'. Must be one of: auto, immediate, deferred"
            ))),
        }
    }
}
