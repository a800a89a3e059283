//! `dsd-gpu` -- NVML-backed resource probing.
//!
//! Re-exported separately from `dsd-core` so only the server binary links
//! against the NVIDIA management library.

pub mod probe;

pub use probe::NvmlProbe;
