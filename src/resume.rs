//! Change-stream resume strategy selection.

use crate::error::TapError;
use crate::types::EngineVersion;

/// Oldest engine version with change-stream support.
pub const MINIMUM_CHANGE_STREAM_VERSION: EngineVersion = EngineVersion::new(3, 6);

/// How a change stream is positioned when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStrategy {
    /// Resume from a stored token; errors if the token has left the oplog.
    ResumeAfter,
    /// Resume from a stored token; reopens gracefully if the token has left
    /// the oplog. Requires 4.2.
    StartAfter,
    /// Open at a given operation time. Requires 4.0.
    StartAtOperationTime,
}

/// Pick the resume strategy for the connected engine.
///
/// The configured preference is honored only when the engine supports it;
/// otherwise the selection degrades to `resume_after`, which every
/// change-stream-capable version accepts.
pub fn select_resume_strategy(
    version: EngineVersion,
    preference: &str,
) -> Result<ResumeStrategy, TapError> {
    if !matches!(
        preference,
        "resume_after" | "start_after" | "start_at_operation_time"
    ) {
        return Err(TapError::InvalidConfig(format!(
            "unsupported change_stream_resume_strategy '{preference}'"
        )));
    }
    if version < MINIMUM_CHANGE_STREAM_VERSION {
        return Err(TapError::UnsupportedEngine(version));
    }
    if version >= EngineVersion::new(4, 0) && preference == "start_at_operation_time" {
        return Ok(ResumeStrategy::StartAtOperationTime);
    }
    if version >= EngineVersion::new(4, 2) && preference == "start_after" {
        return Ok(ResumeStrategy::StartAfter);
    }
    Ok(ResumeStrategy::ResumeAfter)
}
