use std::collections::BTreeMap;

/// Number of return addresses kept per thread. Deeper stacks are truncated.
pub const MAX_STACK_DEPTH: usize = 32;

/// The zero-padded address array of a [`StackRecord`], used as the dedup key.
pub type StackKey = [usize; MAX_STACK_DEPTH];

pub type Labels = BTreeMap<String, String>;

/// The state of one thread at a snapshot instant.
///
/// Addresses are stored leaf first: `stack0[0]` is the innermost frame and
/// `stack0[depth - 1]` is the outermost one (usually the thread entry point).
#[derive(Clone, Debug, PartialEq)]
pub struct StackRecord {
    pub stack0: StackKey,
    depth: usize,
    pub labels: Option<Labels>,
}

impl Default for StackRecord {
    fn default() -> Self {
        Self {
            stack0: [0; MAX_STACK_DEPTH],
            depth: 0,
            labels: None,
        }
    }
}

impl StackRecord {
    /// Builds a record from leaf-first addresses. Stops at the first null
    /// address or at [`MAX_STACK_DEPTH`], whichever comes first.
    pub fn from_addresses(addresses: &[usize]) -> Self {
        let mut record = Self::default();
        for (slot, &address) in record.stack0.iter_mut().zip(addresses) {
            if address == 0 {
                break;
            }
            *slot = address;
            record.depth += 1;
        }
        record
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn key(&self) -> &StackKey {
        &self.stack0
    }

    pub fn stack(&self) -> &[usize] {
        &self.stack0[..self.depth]
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_addresses_stops_at_null() {
        let record = StackRecord::from_addresses(&[0xa, 0xb, 0, 0xc]);
        assert_eq!(record.stack(), &[0xa, 0xb]);
        assert_eq!(record.depth(), 2);
    }

    #[test]
    fn test_from_addresses_truncates() {
        let addresses: Vec<usize> = (1..=MAX_STACK_DEPTH + 8).collect();
        let record = StackRecord::from_addresses(&addresses);
        assert_eq!(record.depth(), MAX_STACK_DEPTH);
        assert_eq!(record.stack().last(), Some(&MAX_STACK_DEPTH));
    }

    #[test]
    fn test_key_ignores_labels() {
        let plain = StackRecord::from_addresses(&[0xa, 0xb]);
        let labeled = StackRecord::from_addresses(&[0xa, 0xb])
            .with_labels(Labels::from([("thread_name".to_owned(), "worker".to_owned())]));
        assert_eq!(plain.key(), labeled.key());
        assert_ne!(plain, labeled);
    }
}
