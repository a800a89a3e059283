//! NVML-based free-memory probe.
//!
//! [`NvmlProbe`] wraps the NVIDIA Management Library and answers the
//! Resource Probe question by reading the free memory of one device on
//! every call.
//!
//! NVML initialisation is **gracefully optional** -- if the host has no
//! NVIDIA drivers (e.g. a developer laptop), the probe logs a warning and
//! always reports insufficient resources instead of panicking, so every
//! request is deferred.

use dsd_core::hardware::probe::{MemoryThreshold, ResourceProbe, BYTES_PER_GIB};
use nvml_wrapper::Nvml;
use serde::Serialize;

/// Point-in-time memory reading for one device.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemorySnapshot {
    pub gpu_index: u32,
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Probes free device memory through NVML.
pub struct NvmlProbe {
    /// `None` when NVML could not be initialised (no drivers / no GPU).
    nvml: Option<Nvml>,
    device_index: u32,
    threshold: MemoryThreshold,
}

impl NvmlProbe {
    /// Attempt to initialise NVML for `device_index`.
    ///
    /// Returns a probe that always answers `false` if NVML is not
    /// available (missing drivers, no NVIDIA hardware, etc.).
    pub fn new(device_index: u32, threshold: MemoryThreshold) -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!(device_index, "NVML initialised successfully");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable -- all generations will be deferred");
                None
            }
        };
        Self {
            nvml,
            device_index,
            threshold,
        }
    }

    /// Read the current memory state of the probed device.
    ///
    /// Returns `None` if NVML is unavailable or the query fails; failures
    /// are logged rather than propagated.
    pub fn snapshot(&self) -> Option<MemorySnapshot> {
        let nvml = self.nvml.as_ref()?;

        let device = match nvml.device_by_index(self.device_index) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(gpu_index = self.device_index, error = %e, "GPU not found");
                return None;
            }
        };

        match device.memory_info() {
            Ok(mem) => Some(MemorySnapshot {
                gpu_index: self.device_index,
                free_bytes: mem.free,
                total_bytes: mem.total,
            }),
            Err(e) => {
                tracing::warn!(gpu_index = self.device_index, error = %e, "GPU memory query failed");
                None
            }
        }
    }
}

impl ResourceProbe for NvmlProbe {
    fn has_sufficient_resources(&self) -> bool {
        let snapshot = self.snapshot();
        let sufficient = self
            .threshold
            .is_satisfied_by(snapshot.map(|s| s.free_bytes));

        tracing::debug!(
            gpu_index = self.device_index,
            free_gib = snapshot.map(|s| s.free_bytes as f64 / BYTES_PER_GIB as f64),
            total_gib = snapshot.map(|s| s.total_bytes as f64 / BYTES_PER_GIB as f64),
            threshold_gib = self.threshold.min_free_bytes() as f64 / BYTES_PER_GIB as f64,
            sufficient,
            "Resource probe evaluated",
        );

        sufficient
    }
}
