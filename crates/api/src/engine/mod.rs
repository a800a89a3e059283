//! Job execution engine.
//!
//! Contains the dispatcher that decides between inline and background
//! execution for each submission, and answers status polls from the
//! artifacts the worker leaves on disk.

pub mod dispatcher;

pub use dispatcher::{DispatchError, ExecutionDispatcher, GenerationRequest, PollOutcome, Submission};
