//! Host-facing error type for the embedding boundary.
//!
//! Inside the VM, failures travel as managed exception objects in thread
//! state. At the embedding boundary they surface as a [`VmError`] carrying
//! the rendered traceback, so hosts that do not want to poke at managed
//! state still get a useful report.

use std::fmt;

/// Error returned by the checked embedding entry points.
#[derive(Debug)]
pub enum VmError {
    /// Managed code raised and nothing caught it. The payload is the
    /// rendered traceback, outermost frame first.
    UnhandledException {
        class_name: String,
        traceback: String,
    },
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::UnhandledException { traceback, .. } => f.write_str(traceback.trim_end()),
        }
    }
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;
