//! Compute-resource probing.
//!
//! The probe contract and threshold logic live here so they can be tested
//! without a GPU. The NVML-backed implementation is in `dsd-gpu`.

pub mod probe;
