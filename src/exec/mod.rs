// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`backend`] provides the `JobDispatcher` trait the step executors
//!   submit jobs through, which tests replace with a fake implementation.
//! - [`step`] runs one step (C2, proxy or no-op) to completion.
//! - [`shell`] is a dispatcher that runs jobs as local processes, used by
//!   the CLI.

pub mod backend;
pub mod shell;
pub mod step;

pub use backend::{DispatchRequest, DispatchTarget, JobDispatcher, ProxyProcedure};
pub use shell::ShellDispatcher;
pub use step::{dispatch_key, StepContext, StepExecutor};
