use std::collections::HashMap;
use std::time::Duration;

use crate::profile::{Function, FunctionId, Location, LocationId, Profile, Sample};
use crate::stack_record::{StackKey, StackRecord};
use crate::symbolizer::{ResolvedFrame, Symbolizer};

/// Folds snapshots into a [`Profile`].
///
/// Repeated stacks are merged into one [`Sample`] by their fixed-width key,
/// so a stack that was already seen costs a single hash lookup. Locations are
/// interned by address and Functions by name, each with its own 1-based id
/// counter.
pub struct ProfileBuilder<'a> {
    profile: Profile,
    symbolizer: &'a dyn Symbolizer,
    propagate_labels: bool,
    sample_index_by_key: HashMap<StackKey, usize>,
    location_id_by_address: HashMap<usize, LocationId>,
    function_id_by_name: HashMap<String, FunctionId>,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(duration: Duration, period: Duration, symbolizer: &'a dyn Symbolizer) -> Self {
        Self {
            profile: Profile::new(duration, period),
            symbolizer,
            propagate_labels: false,
            sample_index_by_key: HashMap::new(),
            location_id_by_address: HashMap::new(),
            function_id_by_name: HashMap::new(),
        }
    }

    /// Copy the labels of the record that creates a Sample into it.
    /// Merging never looks at labels.
    pub fn propagate_labels(mut self, enabled: bool) -> Self {
        self.propagate_labels = enabled;
        self
    }

    pub fn add_batch(&mut self, batch: &[StackRecord]) {
        for record in batch {
            self.add_record(record);
        }
    }

    pub fn add_record(&mut self, record: &StackRecord) {
        let period = self.profile.period_nanos;

        if let Some(&index) = self.sample_index_by_key.get(record.key()) {
            let sample = &mut self.profile.samples[index];
            sample.values[0] += 1;
            sample.values[1] += period;
            return;
        }

        // The outermost frame is the thread entry trampoline; drop it.
        let stack = record.stack();
        let frames = &stack[..stack.len().saturating_sub(1)];
        let locations = frames
            .iter()
            .map(|&address| self.location_id_for(address))
            .collect();

        let labels = if self.propagate_labels {
            record.labels.clone()
        } else {
            None
        };

        self.sample_index_by_key
            .insert(*record.key(), self.profile.samples.len());
        self.profile.samples.push(Sample {
            locations,
            values: [1, period],
            labels,
        });
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn finish(self) -> Profile {
        log::debug!(
            "Built profile: {} samples, {} locations, {} functions",
            self.profile.samples.len(),
            self.profile.locations.len(),
            self.profile.functions.len()
        );
        self.profile
    }

    /// Returns the id of the Location for `address`, creating it (and its
    /// Function) on first sight.
    fn location_id_for(&mut self, address: usize) -> LocationId {
        if let Some(&id) = self.location_id_by_address.get(&address) {
            return id;
        }

        let frame = self.symbolizer.resolve(address);
        let line = frame.line;
        let function_id = self.function_id_for(frame);

        let id = self.profile.locations.len() as LocationId + 1;
        self.profile.locations.push(Location {
            id,
            address: address as u64,
            function_id,
            line,
        });
        self.location_id_by_address.insert(address, id);
        id
    }

    fn function_id_for(&mut self, frame: ResolvedFrame) -> FunctionId {
        if let Some(&id) = self.function_id_by_name.get(&frame.name) {
            return id;
        }

        let id = self.profile.functions.len() as FunctionId + 1;
        self.function_id_by_name.insert(frame.name.clone(), id);
        self.profile.functions.push(Function {
            id,
            name: frame.name,
            system_name: frame.system_name,
            filename: frame.filename,
            start_line: frame.start_line,
        });
        id
    }
}
