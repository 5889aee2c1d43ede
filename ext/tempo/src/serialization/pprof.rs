use std::collections::HashMap;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use super::proto;
use crate::error::{Error, Result};
use crate::profile::{Profile, ValueType};

/// Interns strings into the pprof string table. Index 0 is always "".
#[derive(Debug)]
struct StringTable {
    strings: Vec<String>,
    indices: HashMap<String, i64>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = Self {
            strings: vec![],
            indices: HashMap::new(),
        };
        table.intern("");
        table
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&index) = self.indices.get(s) {
            return index;
        }
        let index = self.strings.len() as i64;
        self.strings.push(s.to_owned());
        self.indices.insert(s.to_owned(), index);
        index
    }

    fn into_inner(self) -> Vec<String> {
        self.strings
    }
}

fn value_type(strings: &mut StringTable, value_type: &ValueType) -> proto::ValueType {
    proto::ValueType {
        r#type: strings.intern(&value_type.kind),
        unit: strings.intern(&value_type.unit),
    }
}

/// Flattens a [`Profile`] into its protobuf form.
pub fn to_proto(profile: &Profile) -> proto::Profile {
    let mut strings = StringTable::new();

    let sample_type = profile
        .sample_types
        .iter()
        .map(|t| value_type(&mut strings, t))
        .collect();
    let period_type = Some(value_type(&mut strings, &profile.period_type));

    let sample = profile
        .samples
        .iter()
        .map(|sample| proto::Sample {
            location_id: sample.locations.clone(),
            value: sample.values.to_vec(),
            label: sample
                .labels
                .iter()
                .flatten()
                .map(|(key, value)| proto::Label {
                    key: strings.intern(key),
                    str: strings.intern(value),
                })
                .collect(),
        })
        .collect();

    let location = profile
        .locations
        .iter()
        .map(|location| proto::Location {
            id: location.id,
            address: location.address,
            line: vec![proto::Line {
                function_id: location.function_id,
                line: location.line,
            }],
        })
        .collect();

    let function = profile
        .functions
        .iter()
        .map(|function| proto::Function {
            id: function.id,
            name: strings.intern(&function.name),
            system_name: strings.intern(&function.system_name),
            filename: strings.intern(&function.filename),
            start_line: function.start_line,
        })
        .collect();

    proto::Profile {
        sample_type,
        sample,
        location,
        function,
        string_table: strings.into_inner(),
        time_nanos: profile.time_nanos,
        duration_nanos: profile.duration_nanos,
        period_type,
        period: profile.period_nanos,
        default_sample_type: 0,
    }
}

/// Writes `profile` as a gzip-compressed pprof protobuf.
pub fn write_pprof<W: Write>(profile: &Profile, writer: W) -> Result<()> {
    let encoded = to_proto(profile).encode_to_vec();
    let mut encoder = GzEncoder::new(writer, Compression::default());
    encoder.write_all(&encoded).map_err(Error::Serialization)?;
    encoder.finish().map_err(Error::Serialization)?;
    Ok(())
}
