use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::snapshot::SnapshotSource;
use crate::stack_record::StackRecord;

/// Drives snapshots at a fixed pace.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    period: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub ticks: u64,
    pub records: usize,
}

impl Sampler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of snapshots taken for `total`. Truncates: a duration shorter
    /// than one period takes none.
    pub fn tick_count(&self, total: Duration) -> u64 {
        if self.period.is_zero() {
            return 0;
        }
        u64::try_from(total.as_nanos() / self.period.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Takes `tick_count(total)` snapshots from `source`, handing each batch
    /// to `on_batch` in capture order.
    ///
    /// Ticks are paced rather than scheduled: when a capture overruns the
    /// period the next tick starts immediately and missed ticks are not made
    /// up. `cancel` is polled before every tick; a capture in progress is
    /// never interrupted.
    pub fn run<F>(
        &self,
        total: Duration,
        source: &dyn SnapshotSource,
        cancel: &CancellationToken,
        mut on_batch: F,
    ) -> Result<SamplerReport>
    where
        F: FnMut(Vec<StackRecord>),
    {
        let ticks = self.tick_count(total);
        log::debug!(
            "Sampling {} ticks every {:?} ({:?} requested)",
            ticks,
            self.period,
            total
        );

        let mut report = SamplerReport::default();
        loop {
            if cancel.is_cancelled() {
                log::debug!("Sampling cancelled after {} ticks", report.ticks);
                return Err(Error::Cancelled);
            }
            if report.ticks == ticks {
                break;
            }

            let sleep_to = Instant::now() + self.period;
            let batch = source.capture()?;
            log::trace!("Tick {}: captured {} stacks", report.ticks, batch.len());
            report.records += batch.len();
            report.ticks += 1;
            on_batch(batch);

            if report.ticks < ticks {
                thread::sleep(sleep_to.saturating_duration_since(Instant::now()));
            }
        }

        Ok(report)
    }
}
