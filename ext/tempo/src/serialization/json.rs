use std::io::Write;

use crate::error::Result;
use crate::profile::Profile;

pub fn to_json(profile: &Profile) -> Result<String> {
    Ok(serde_json::to_string(profile)?)
}

pub fn write_json<W: Write>(profile: &Profile, writer: W) -> Result<()> {
    serde_json::to_writer(writer, profile)?;
    Ok(())
}
