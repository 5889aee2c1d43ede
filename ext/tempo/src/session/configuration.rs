use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10);
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_CAPTURE_HEADROOM: usize = 10;
pub const DEFAULT_MAX_CAPTURE_ATTEMPTS: u32 = 8;
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_OUTPUT_FORMAT: OutputFormat = OutputFormat::Pprof;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Time between two snapshots.
    pub period: Duration,
    /// Total sampled duration. The session takes `duration / period` snapshots.
    pub duration: Duration,
    /// Spare records allocated on top of the probed thread count.
    pub capture_headroom: usize,
    /// How many times a snapshot is retried when the thread list outgrows its buffer.
    pub max_capture_attempts: u32,
    /// How long to wait for a single thread to report its stack.
    pub capture_timeout: Duration,
    /// Signal used to interrupt threads. Defaults to `SIGRTMIN + 4`.
    pub capture_signal: Option<i32>,
    /// Attach thread name and id labels to samples.
    pub propagate_labels: bool,
    pub output_format: OutputFormat,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            duration: DEFAULT_DURATION,
            capture_headroom: DEFAULT_CAPTURE_HEADROOM,
            max_capture_attempts: DEFAULT_MAX_CAPTURE_ATTEMPTS,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            capture_signal: None,
            propagate_labels: false,
            output_format: DEFAULT_OUTPUT_FORMAT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// gzip-compressed `perftools.profiles.Profile` protobuf.
    Pprof,
    /// The profile model as JSON.
    Json,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pprof => "application/octet-stream",
            Self::Json => "application/json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pprof" => Ok(Self::Pprof),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}
