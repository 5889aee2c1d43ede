pub mod configuration;

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use self::configuration::Configuration;
use crate::error::Result;
use crate::profile::Profile;
use crate::profile_builder::ProfileBuilder;
use crate::sampler::Sampler;
use crate::serialization;
use crate::snapshot::SnapshotSource;
use crate::symbolizer::{BacktraceSymbolizer, Symbolizer};
use crate::thread_snapshot::ThreadSnapshot;

/// One profiling request.
///
/// The profile and its caches live only for the duration of [`Session::run`];
/// the snapshot source and symbolizer may be shared between sessions.
pub struct Session {
    pub configuration: Configuration,
    source: Arc<dyn SnapshotSource>,
    symbolizer: Arc<dyn Symbolizer>,
}

impl Session {
    pub fn new(
        configuration: Configuration,
        source: Arc<dyn SnapshotSource>,
        symbolizer: Arc<dyn Symbolizer>,
    ) -> Self {
        Self {
            configuration,
            source,
            symbolizer,
        }
    }

    /// A session over the threads of the current process.
    pub fn for_current_process(configuration: Configuration) -> Result<Self> {
        let source = ThreadSnapshot::new(&configuration)?;
        Ok(Self::new(
            configuration,
            Arc::new(source),
            Arc::new(BacktraceSymbolizer),
        ))
    }

    /// Samples for the configured duration and returns the aggregated profile.
    /// Nothing is returned when the session is cancelled or a capture fails.
    pub fn run(&self, cancel: &CancellationToken) -> Result<Profile> {
        let sampler = Sampler::new(self.configuration.period);
        let mut builder = ProfileBuilder::new(
            self.configuration.duration,
            self.configuration.period,
            self.symbolizer.as_ref(),
        )
        .propagate_labels(self.configuration.propagate_labels);

        let report = sampler.run(
            self.configuration.duration,
            self.source.as_ref(),
            cancel,
            |batch| builder.add_batch(&batch),
        )?;
        log::debug!(
            "Session finished: {} ticks, {} stacks",
            report.ticks,
            report.records
        );

        Ok(builder.finish())
    }

    /// Runs the session and writes the profile in the configured format.
    pub fn write_profile<W: Write>(&self, cancel: &CancellationToken, writer: W) -> Result<()> {
        let profile = self.run(cancel)?;
        serialization::write(&profile, self.configuration.output_format, writer)
    }
}

// Builds with the `debug` feature log to stderr without any setup by the host.
pub(crate) fn init_debug_logging() {
    #[cfg(feature = "debug")]
    {
        // The host may have installed a logger already.
        let _ = env_logger::builder()
            .format_timestamp(None)
            .format_module_path(false)
            .try_init();
    }
}
