//! Client for the diffusion job API.
//!
//! [`GenerationClient`] submits jobs and polls for their output with a
//! bounded, cancellable backoff (see [`backoff`]).

pub mod backoff;
pub mod client;
pub mod error;

pub use backoff::BackoffConfig;
pub use client::{GenerationClient, PollStatus, SubmitRequest, Submitted};
pub use error::ClientError;
