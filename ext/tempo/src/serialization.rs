pub mod json;
pub mod pprof;
pub mod proto;

use std::io::Write;

use crate::error::Result;
use crate::profile::Profile;
use crate::session::configuration::OutputFormat;

/// Writes `profile` to `writer` in the requested format.
pub fn write<W: Write>(profile: &Profile, format: OutputFormat, writer: W) -> Result<()> {
    match format {
        OutputFormat::Pprof => pprof::write_pprof(profile, writer),
        OutputFormat::Json => json::write_json(profile, writer),
    }
}
