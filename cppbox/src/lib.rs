//! # cppbox
//!
//! Ephemeral compile-and-execute orchestration: one C++ snippet in, one
//! isolated, time-bounded, cancellable compile + run cycle out, with every
//! transient artifact reclaimed even under failure, timeout, or cancellation
//! races.

mod diagnostics;
mod error;
mod registry;
mod service;
mod supervisor;
mod toolchain;
mod types;
mod workspace;

pub use diagnostics::parse_diagnostics;
pub use error::Error;
pub use registry::ExecutionRegistry;
pub use service::{CompileRunService, ServiceLimits};
pub use supervisor::{ExecutionHandle, ProcessSupervisor};
pub use toolchain::{CompileOutcome, Toolchain};
pub use types::{
    CompileFailure, CompileOnly, CompileRequest, Diagnostic, ExecutionResult, ExecutionStatus,
    RunOutcome, Severity,
};
pub use workspace::{WorkUnit, WorkspaceManager, SWEEP_INTERVAL, SWEEP_RETENTION};

/// Result type for compile-and-execute operations
pub type Result<T> = std::result::Result<T, Error>;
