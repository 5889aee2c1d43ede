use crate::error::{Error, Result};
use crate::session::{self, configuration::Configuration};
use crate::snapshot::SnapshotSource;
use crate::stack_record::StackRecord;

/// Thread snapshots rely on `/proc` and `tgkill`, which only exist on Linux.
#[derive(Debug)]
pub struct ThreadSnapshot {}

impl ThreadSnapshot {
    pub fn new(_configuration: &Configuration) -> Result<Self> {
        session::init_debug_logging();
        log::debug!("Thread snapshots are not supported on this platform");
        Err(Error::Unsupported)
    }
}

impl SnapshotSource for ThreadSnapshot {
    fn capture(&self) -> Result<Vec<StackRecord>> {
        Err(Error::Unsupported)
    }
}
