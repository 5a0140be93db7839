// SPDX-License-Identifier: GPL-2.0

use thiserror::Error;

/// Errors surfaced by the control and membership entry points.
///
/// Inconsistencies detected deep inside the hot paths (negative running
/// counts, duplicate membership) are corrected in place and logged rather
/// than propagated; only caller mistakes become `FbgError`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FbgError {
    #[error("invalid argument")]
    InvalidArg,

    #[error("invalid frame group id {0}")]
    InvalidGroupId(i32),

    #[error("dynamic frame group id {0} is not allocated")]
    InactiveMultiId(i32),

    #[error("no free dynamic frame group slot")]
    NoFreeMultiId,

    #[error("no such task {0}")]
    UnknownTask(i32),

    #[error("group {0} has no frame info")]
    NoFrameInfo(i32),
}

pub type Result<T> = std::result::Result<T, FbgError>;
