use chrono::{DateTime, Utc};
use serde::Serialize;

use super::format::AudioFormatDescriptor;

/// Snapshot of a capture session for debugging and host-side reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureDiagnostics {
    pub pid: u32,
    pub backend: String,
    pub state: String,
    pub format: Option<AudioFormatDescriptor>,
    pub started_at: Option<DateTime<Utc>>,
    pub batches_delivered: u64,
    pub frames_delivered: u64,
    pub silent_batches_skipped: u64,
    pub stream_errors: u64,
    pub callback_panics: u64,
    pub fault: Option<String>,
}
