//! Domain logic for the diffusion job service.
//!
//! Everything here is free of HTTP concerns so the dispatcher, the worker
//! and the status endpoint can share one definition of what a job is and
//! where its artifacts live.

pub mod error;
pub mod hardware;
pub mod imaging;
pub mod job;
pub mod layout;
pub mod types;
