use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("profiling session was cancelled")]
    Cancelled,

    /// The thread list kept growing faster than the capture buffer.
    #[error(
        "could not capture a consistent thread list after {attempts} attempts ({live_units} live threads)"
    )]
    CaptureExhausted { attempts: u32, live_units: usize },

    /// A thread started writing its stack but did not finish. Captures fail
    /// until it does.
    #[error("thread {tid} did not finish writing its stack within {timeout:?}")]
    CaptureStalled { tid: i32, timeout: Duration },

    #[error("failed to enumerate threads: {0}")]
    Capture(#[source] io::Error),

    #[error("failed to install the capture signal handler: {0}")]
    SignalSetup(#[source] io::Error),

    #[error("thread snapshots are not supported on this platform")]
    Unsupported,

    #[error("failed to write profile: {0}")]
    Serialization(#[source] io::Error),

    #[error("failed to encode profile as JSON: {0}")]
    Json(#[from] serde_json::Error),
}
