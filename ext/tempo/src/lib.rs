//! Wall-clock sampling profiler.
//!
//! A [`Session`] periodically snapshots the stacks of every thread in the
//! process, including threads that are sleeping, blocked on a lock or waiting
//! for I/O, and folds the snapshots into a pprof-compatible [`Profile`].
//!
//! ```no_run
//! use tempo::{Configuration, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = Session::for_current_process(Configuration::default())?;
//! let mut out = std::fs::File::create("wall.pb.gz").map_err(tempo::Error::Serialization)?;
//! session.write_profile(&CancellationToken::new(), &mut out)?;
//! # Ok::<(), tempo::Error>(())
//! ```

extern crate serde;
#[macro_use]
extern crate serde_derive;

mod error;
pub mod profile;
mod profile_builder;
mod sampler;
pub mod serialization;
mod session;
mod snapshot;
mod stack_record;
mod symbolizer;
#[cfg(target_os = "linux")]
mod thread_snapshot;
#[cfg(not(target_os = "linux"))]
#[path = "thread_snapshot_unsupported_platform.rs"]
mod thread_snapshot;
#[cfg(target_os = "linux")]
mod util;

pub use error::{Error, Result};
pub use profile::{Function, Location, Profile, Sample, ValueType};
pub use profile_builder::ProfileBuilder;
pub use sampler::{Sampler, SamplerReport};
pub use session::configuration::{self, Configuration, OutputFormat};
pub use session::Session;
pub use snapshot::{capture_with_headroom, SnapshotSource, UnitTable};
pub use stack_record::{Labels, StackKey, StackRecord, MAX_STACK_DEPTH};
pub use symbolizer::{BacktraceSymbolizer, ResolvedFrame, Symbolizer};
pub use thread_snapshot::ThreadSnapshot;
