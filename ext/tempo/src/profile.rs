use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::stack_record::Labels;

/// 1-based, assigned in order of first sight.
pub type LocationId = u64;
/// 1-based, assigned in order of first sight.
pub type FunctionId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueType {
    #[serde(rename = "type")]
    pub kind: String,
    pub unit: String,
}

impl ValueType {
    pub fn new(kind: &str, unit: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            unit: unit.to_owned(),
        }
    }
}

/// A distinct stack shape and how often it was observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// The stack leading to this sample. The leaf is stored at `locations[0]`.
    pub locations: Vec<LocationId>,
    /// `[occurrences, wall nanoseconds]`, matching `Profile::sample_types`.
    pub values: [i64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

impl Sample {
    pub fn count(&self) -> i64 {
        self.values[0]
    }

    pub fn wall_nanos(&self) -> i64 {
        self.values[1]
    }
}

/// A call site: one return address and the line it maps to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub address: u64,
    pub function_id: FunctionId,
    pub line: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    /// Unique key of the function within a profile.
    pub name: String,
    pub system_name: String,
    pub filename: String,
    /// The first line of the function definition.
    /// For the line hit during sampling, refer to `Location::line`.
    pub start_line: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Wall-clock start of the session, nanoseconds since the Unix epoch.
    pub time_nanos: i64,
    /// The requested duration, not the measured one.
    pub duration_nanos: i64,
    pub period_nanos: i64,
    pub sample_types: Vec<ValueType>,
    pub period_type: ValueType,
    pub samples: Vec<Sample>,
    pub locations: Vec<Location>,
    pub functions: Vec<Function>,
}

impl Profile {
    pub fn new(duration: Duration, period: Duration) -> Self {
        let time_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_to_nanos)
            .unwrap_or(0);
        Self {
            time_nanos,
            duration_nanos: duration_to_nanos(duration),
            period_nanos: duration_to_nanos(period),
            sample_types: vec![
                ValueType::new("samples", "count"),
                ValueType::new("wall", "nanoseconds"),
            ],
            period_type: ValueType::new("wall", "nanoseconds"),
            samples: vec![],
            locations: vec![],
            functions: vec![],
        }
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.locations.get(index)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.functions.get(index)
    }

    /// Sum of occurrences over all samples.
    pub fn total_count(&self) -> i64 {
        self.samples.iter().map(Sample::count).sum()
    }
}

pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_profile_declares_value_types() {
        let profile = Profile::new(Duration::from_secs(5), Duration::from_millis(10));
        assert_eq!(profile.duration_nanos, 5_000_000_000);
        assert_eq!(profile.period_nanos, 10_000_000);
        assert_eq!(
            profile.sample_types,
            vec![
                ValueType::new("samples", "count"),
                ValueType::new("wall", "nanoseconds")
            ]
        );
        assert_eq!(profile.period_type, ValueType::new("wall", "nanoseconds"));
        assert!(profile.time_nanos > 0);
        assert_eq!(profile.total_count(), 0);
    }

    #[test]
    fn test_lookup_by_id() {
        let mut profile = Profile::new(Duration::ZERO, Duration::from_millis(10));
        profile.functions.push(Function {
            id: 1,
            name: "main".to_owned(),
            system_name: "main".to_owned(),
            filename: "main.rs".to_owned(),
            start_line: 1,
        });
        profile.locations.push(Location {
            id: 1,
            address: 0x1000,
            function_id: 1,
            line: 3,
        });

        assert_eq!(profile.location(1).map(|l| l.address), Some(0x1000));
        assert_eq!(profile.function(1).map(|f| f.name.as_str()), Some("main"));
        assert!(profile.location(0).is_none());
        assert!(profile.location(2).is_none());
        assert!(profile.function(0).is_none());
    }
}
