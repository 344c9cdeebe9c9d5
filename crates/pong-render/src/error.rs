// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Failures the presentation engine can report.
///
/// Out-of-date and suboptimal surfaces are normally absorbed by the swap
/// chain manager and never reach the caller; `OutOfDate` only escapes when
/// a backend reports it from an operation that has no rebuild path.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no GPU satisfies the presentation requirements")]
    NoCapableDeviceFound,

    #[error("presentation surface lost")]
    SurfaceLost,

    #[error("presentation surface out of date")]
    OutOfDate,

    #[error("GPU device lost")]
    DeviceLost,

    #[error("{op} failed: {reason}")]
    Backend { op: &'static str, reason: String },
}

impl RenderError {
    pub fn backend(op: &'static str, reason: impl ToString) -> Self {
        Self::Backend {
            op,
            reason: reason.to_string(),
        }
    }

    /// True for errors that leave the device unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::OutOfDate)
    }
}
