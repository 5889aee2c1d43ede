use crate::error::{Error, Result};
use crate::stack_record::StackRecord;

/// Captures the stacks of every live thread at one instant.
///
/// Implementations are shared between concurrent sessions, so `capture` must
/// be safe to call from several threads at once.
pub trait SnapshotSource: Send + Sync {
    fn capture(&self) -> Result<Vec<StackRecord>>;
}

/// A two-phase enumeration primitive.
///
/// `fill` writes one record per live unit into `buf` and returns
/// `(count, true)`. When more units exist than `buf` can hold it writes
/// nothing useful and returns `(live_count, false)`. Passing an empty buffer
/// is therefore a cheap way to probe the live count.
pub trait UnitTable {
    fn fill(&self, buf: &mut [StackRecord]) -> Result<(usize, bool)>;
}

/// Captures every unit of `table`, sizing the buffer with `headroom` spare
/// records to absorb units created between the probe and the capture.
///
/// A single fill normally succeeds. If the table outgrew the buffer, the
/// capture is retried with the newly observed count, at most `max_attempts`
/// times.
pub fn capture_with_headroom<T>(
    table: &T,
    headroom: usize,
    max_attempts: u32,
) -> Result<Vec<StackRecord>>
where
    T: UnitTable + ?Sized,
{
    let (mut live_units, _) = table.fill(&mut [])?;

    for attempt in 1..=max_attempts {
        let mut buf = vec![StackRecord::default(); live_units + headroom];
        let (count, ok) = table.fill(&mut buf)?;
        if ok {
            buf.truncate(count);
            return Ok(buf);
        }
        log::debug!(
            "Thread list grew to {} (buffer of {}); retrying (attempt {}/{})",
            count,
            buf.len(),
            attempt,
            max_attempts
        );
        live_units = count;
    }

    Err(Error::CaptureExhausted {
        attempts: max_attempts,
        live_units,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    /// A table whose population grows by `growth` after each of its first
    /// `growing_calls` calls.
    struct GrowingTable {
        live: Cell<usize>,
        growth: usize,
        growing_calls: Cell<usize>,
        buffer_sizes: RefCell<Vec<usize>>,
    }

    impl GrowingTable {
        fn new(live: usize, growth: usize, growing_calls: usize) -> Self {
            Self {
                live: Cell::new(live),
                growth,
                growing_calls: Cell::new(growing_calls),
                buffer_sizes: RefCell::new(vec![]),
            }
        }
    }

    impl UnitTable for GrowingTable {
        fn fill(&self, buf: &mut [StackRecord]) -> Result<(usize, bool)> {
            self.buffer_sizes.borrow_mut().push(buf.len());
            let live = self.live.get();
            if self.growing_calls.get() > 0 {
                self.growing_calls.set(self.growing_calls.get() - 1);
                self.live.set(live + self.growth);
            }
            if live > buf.len() {
                return Ok((live, false));
            }
            for (i, slot) in buf.iter_mut().take(live).enumerate() {
                *slot = StackRecord::from_addresses(&[0x1000 + i, 0xffff]);
            }
            Ok((live, true))
        }
    }

    #[test]
    fn test_capture_fits_on_first_attempt() {
        let table = GrowingTable::new(3, 2, usize::MAX);
        let records = capture_with_headroom(&table, 10, 8).unwrap();
        // probe saw 3, the fill saw 5: still within 3 + 10
        assert_eq!(records.len(), 5);
        assert_eq!(*table.buffer_sizes.borrow(), vec![0, 13]);
    }

    #[test]
    fn test_capture_retries_with_larger_buffer() {
        let table = GrowingTable::new(4, 20, 2);
        let records = capture_with_headroom(&table, 10, 8).unwrap();
        // probe sees 4, the first fill sees 24 and the second 44; only the
        // third buffer (44 + 10) is large enough
        assert_eq!(records.len(), 44);
        assert_eq!(*table.buffer_sizes.borrow(), vec![0, 14, 34, 54]);
    }

    #[test]
    fn test_capture_gives_up_after_max_attempts() {
        let table = GrowingTable::new(1, 100, usize::MAX);
        match capture_with_headroom(&table, 10, 3) {
            Err(Error::CaptureExhausted {
                attempts,
                live_units,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(live_units, 301);
            }
            other => panic!("expected CaptureExhausted, got {:?}", other),
        }
        // one probe plus three fills
        assert_eq!(table.buffer_sizes.borrow().len(), 4);
    }

    #[test]
    fn test_capture_of_empty_table() {
        let table = GrowingTable::new(0, 0, 0);
        assert!(capture_with_headroom(&table, 10, 8).unwrap().is_empty());
    }
}
