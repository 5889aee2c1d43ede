#![deny(unsafe_op_in_unsafe_fn)]

use std::cell::UnsafeCell;
use std::ffi::{c_int, c_void};
use std::io;
use std::ptr::{null, null_mut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use std::{mem, thread};

use crate::error::{Error, Result};
use crate::session::{self, configuration::Configuration};
use crate::snapshot::{capture_with_headroom, SnapshotSource, UnitTable};
use crate::stack_record::{Labels, StackRecord, MAX_STACK_DEPTH};
use crate::util;

/// Room for the frames of the signal handler itself, which are cut off
/// before the stack is published.
const HANDLER_STACK_DEPTH: usize = MAX_STACK_DEPTH + 64;

const DEFAULT_SIGNAL_OFFSET: c_int = 4;

// Request states
const IDLE: u64 = 0;
const REQUESTED: u64 = 1;
const WRITING: u64 = 2;
const DONE: u64 = 3;

const STATE_BITS: u32 = 8;
const TID_BITS: u32 = 32;
const GENERATION_MASK: u64 = (1 << (64 - STATE_BITS - TID_BITS)) - 1;

/// Packs a capture request into one word, so that the handler can claim
/// exactly the request it observed with a single CAS.
///
/// Layout: `generation << 40 | tid << 8 | state`.
fn pack(generation: u64, tid: libc::pid_t, state: u64) -> u64 {
    ((generation & GENERATION_MASK) << (STATE_BITS + TID_BITS))
        | (u64::from(tid as u32) << STATE_BITS)
        | state
}

fn state_of(request: u64) -> u64 {
    request & ((1 << STATE_BITS) - 1)
}

fn tid_of(request: u64) -> libc::pid_t {
    (request >> STATE_BITS) as u32 as libc::pid_t
}

fn with_state(request: u64, state: u64) -> u64 {
    (request & !((1 << STATE_BITS) - 1)) | state
}

/// The single rendezvous point between the capturing thread and the signal
/// handler running on the target thread. Only one thread is captured at a
/// time (see `CAPTURE_LOCK`).
struct CaptureSlot {
    request: AtomicU64,
    generation: AtomicU64,
    /// Set when a handler claimed a request and did not finish in time.
    /// The slot can't be reused until that handler publishes.
    stalled: AtomicBool,
    start: AtomicUsize,
    depth: AtomicUsize,
    frames: UnsafeCell<[usize; HANDLER_STACK_DEPTH]>,
}

// `frames` is written only by the handler that moved its request to WRITING,
// and read only by the capturer after observing DONE for that request.
unsafe impl Sync for CaptureSlot {}

impl CaptureSlot {
    const fn new() -> Self {
        Self {
            request: AtomicU64::new(IDLE),
            generation: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            start: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
            frames: UnsafeCell::new([0; HANDLER_STACK_DEPTH]),
        }
    }

    /// Publishes a request for `tid` and returns it.
    fn post(&self, tid: libc::pid_t) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let request = pack(generation, tid, REQUESTED);
        self.request.store(request, Ordering::Release);
        request
    }

    /// Called from the handler with the request it loaded earlier. Fails if
    /// the request was withdrawn or replaced in between.
    fn try_claim(&self, observed: u64, tid: libc::pid_t) -> bool {
        state_of(observed) == REQUESTED
            && tid_of(observed) == tid
            && self
                .request
                .compare_exchange(
                    observed,
                    with_state(observed, WRITING),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    fn publish(&self, claimed: u64, start: usize, depth: usize) {
        self.start.store(start, Ordering::Relaxed);
        self.depth.store(depth, Ordering::Relaxed);
        self.request.store(with_state(claimed, DONE), Ordering::Release);
    }

    /// Makes the slot usable again after a stall, once the late handler has
    /// published. Errors while it is still running.
    fn recover(&self, timeout: Duration) -> Result<()> {
        if !self.stalled.load(Ordering::Acquire) {
            return Ok(());
        }
        let current = self.request.load(Ordering::Acquire);
        if state_of(current) == WRITING {
            return Err(Error::CaptureStalled {
                tid: tid_of(current),
                timeout,
            });
        }
        self.request.store(IDLE, Ordering::Release);
        self.stalled.store(false, Ordering::Release);
        log::debug!("Capture slot recovered from a stalled handler");
        Ok(())
    }

    /// Waits for the answer to `request`.
    ///
    /// Returns `None` if the target did not start its handler before
    /// `timeout`, and an error if the handler started but did not finish
    /// within another `timeout`.
    fn wait(&self, request: u64, timeout: Duration) -> Result<Option<Vec<usize>>> {
        let tid = tid_of(request);
        let deadline = Instant::now() + timeout;
        let mut writing_deadline = None;
        loop {
            let current = self.request.load(Ordering::Acquire);
            if current == with_state(request, DONE) {
                break;
            }
            if current == request && Instant::now() >= deadline {
                // The handler has not started yet; withdraw the request.
                // If it claimed it in the meantime, keep waiting.
                if self
                    .request
                    .compare_exchange(request, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    log::debug!("Thread {} did not respond within {:?}", tid, timeout);
                    return Ok(None);
                }
            }
            if current == with_state(request, WRITING) {
                let writing_deadline =
                    *writing_deadline.get_or_insert_with(|| Instant::now() + timeout);
                if Instant::now() >= writing_deadline {
                    self.stalled.store(true, Ordering::Release);
                    log::warn!("Thread {} stalled while writing its stack", tid);
                    return Err(Error::CaptureStalled { tid, timeout });
                }
            }
            thread::yield_now();
        }

        let start = self.start.load(Ordering::Relaxed);
        let depth = self.depth.load(Ordering::Relaxed);
        let frames = unsafe { &*self.frames.get() };
        let stack = frames[start..depth].to_vec();

        self.request.store(IDLE, Ordering::Release);
        Ok(Some(stack))
    }
}

static SLOT: CaptureSlot = CaptureSlot::new();

static CAPTURE_LOCK: Mutex<()> = Mutex::new(());
static INSTALLED_SIGNALS: Mutex<Vec<c_int>> = Mutex::new(Vec::new());

/// Snapshots the OS threads of the current process.
///
/// Each thread is interrupted with a real-time signal and walks its own stack
/// from inside the handler. The thread calling [`SnapshotSource::capture`] is
/// not part of the snapshot.
#[derive(Debug)]
pub struct ThreadSnapshot {
    pid: libc::pid_t,
    signal: c_int,
    headroom: usize,
    max_attempts: u32,
    timeout: Duration,
    labels: bool,
}

impl ThreadSnapshot {
    pub fn new(configuration: &Configuration) -> Result<Self> {
        session::init_debug_logging();
        let signal = configuration
            .capture_signal
            .unwrap_or_else(|| libc::SIGRTMIN() + DEFAULT_SIGNAL_OFFSET);
        Self::install_signal_handler(signal).map_err(Error::SignalSetup)?;

        Ok(Self {
            pid: unsafe { libc::getpid() },
            signal,
            headroom: configuration.capture_headroom,
            max_attempts: configuration.max_capture_attempts.max(1),
            timeout: configuration.capture_timeout,
            labels: configuration.propagate_labels,
        })
    }

    pub fn signal(&self) -> c_int {
        self.signal
    }

    // Install the capture handler for `signal` to the current process, once.
    fn install_signal_handler(signal: c_int) -> io::Result<()> {
        let mut installed = INSTALLED_SIGNALS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if installed.contains(&signal) {
            return Ok(());
        }

        let mut old: libc::sigaction = unsafe { mem::zeroed() };
        let err = unsafe { libc::sigaction(signal, null(), &mut old) };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }
        if old.sa_sigaction != libc::SIG_DFL {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("signal {} already has a handler", signal),
            ));
        }

        let mut sa: libc::sigaction = unsafe { mem::zeroed() };
        sa.sa_sigaction = Self::signal_handler as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        unsafe { libc::sigemptyset(&mut sa.sa_mask) };
        let err = unsafe { libc::sigaction(signal, &sa, null_mut()) };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }

        installed.push(signal);
        log::debug!("Signal handler installed for signal {}", signal);
        Ok(())
    }

    // Walk the interrupted thread's stack into SLOT.
    //
    // Unwinding is not guaranteed to be async-signal-safe, but collecting
    // instruction pointers without resolving them is what other in-process
    // profilers do as well.
    extern "C" fn signal_handler(
        _sig: c_int,
        _info: *mut libc::siginfo_t,
        ucontext: *mut c_void,
    ) {
        let saved_errno = unsafe { *libc::__errno_location() };

        let tid = unsafe { libc::gettid() };
        let observed = SLOT.request.load(Ordering::Acquire);
        if SLOT.try_claim(observed, tid) {
            let frames = unsafe { &mut *SLOT.frames.get() };
            let mut depth = 0;
            unsafe {
                backtrace::trace_unsynchronized(|frame| {
                    frames[depth] = frame.ip() as usize;
                    depth += 1;
                    depth < HANDLER_STACK_DEPTH
                });
            }

            // Everything above the interrupted instruction belongs to the
            // handler. Keep the whole walk if it cannot be located.
            let start = interrupted_pc(ucontext)
                .and_then(|pc| frames[..depth].iter().position(|&ip| ip == pc))
                .unwrap_or(0);

            SLOT.publish(observed, start, depth);
        }

        unsafe { *libc::__errno_location() = saved_errno };
    }

    /// Interrupts `tid` and waits for its stack. Returns `None` if the thread
    /// is gone or does not answer within the timeout.
    fn capture_thread(&self, tid: libc::pid_t) -> Result<Option<Vec<usize>>> {
        let request = SLOT.post(tid);

        let err = unsafe { libc::syscall(libc::SYS_tgkill, self.pid, tid, self.signal) };
        if err != 0 {
            log::trace!("tgkill({}) failed: {}", tid, io::Error::last_os_error());
            SLOT.request.store(IDLE, Ordering::Release);
            return Ok(None);
        }

        SLOT.wait(request, self.timeout)
    }

    fn labels_for(tid: libc::pid_t) -> Labels {
        let mut labels = Labels::new();
        labels.insert("thread_id".to_owned(), tid.to_string());
        if let Some(name) = util::thread_name(tid) {
            labels.insert("thread_name".to_owned(), name);
        }
        labels
    }
}

impl UnitTable for ThreadSnapshot {
    fn fill(&self, buf: &mut [StackRecord]) -> Result<(usize, bool)> {
        let current = util::current_tid();
        let tids: Vec<libc::pid_t> = util::list_thread_ids()
            .map_err(Error::Capture)?
            .into_iter()
            .filter(|&tid| tid != current)
            .collect();
        if tids.len() > buf.len() {
            return Ok((tids.len(), false));
        }

        let _guard = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        SLOT.recover(self.timeout)?;
        let mut count = 0;
        for tid in tids {
            // Threads that exited since the listing are skipped.
            let Some(stack) = self.capture_thread(tid)? else {
                continue;
            };
            let mut record = StackRecord::from_addresses(&stack);
            if self.labels {
                record.labels = Some(Self::labels_for(tid));
            }
            buf[count] = record;
            count += 1;
        }
        Ok((count, true))
    }
}

impl SnapshotSource for ThreadSnapshot {
    fn capture(&self) -> Result<Vec<StackRecord>> {
        capture_with_headroom(self, self.headroom, self.max_attempts)
    }
}

#[cfg(target_arch = "x86_64")]
fn interrupted_pc(ucontext: *mut c_void) -> Option<usize> {
    if ucontext.is_null() {
        return None;
    }
    let ucontext = unsafe { &*(ucontext as *const libc::ucontext_t) };
    Some(ucontext.uc_mcontext.gregs[libc::REG_RIP as usize] as usize)
}

#[cfg(target_arch = "aarch64")]
fn interrupted_pc(ucontext: *mut c_void) -> Option<usize> {
    if ucontext.is_null() {
        return None;
    }
    let ucontext = unsafe { &*(ucontext as *const libc::ucontext_t) };
    Some(ucontext.uc_mcontext.pc as usize)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn interrupted_pc(_ucontext: *mut c_void) -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn foreign_handler(_sig: c_int) {}

    #[test]
    fn test_pack() {
        let request = pack(5, 1234, REQUESTED);
        assert_eq!(state_of(request), REQUESTED);
        assert_eq!(tid_of(request), 1234);
        assert_eq!(tid_of(with_state(request, DONE)), 1234);
        assert_eq!(state_of(with_state(request, DONE)), DONE);
        assert_ne!(request, pack(6, 1234, REQUESTED));
    }

    #[test]
    fn test_replaced_request_cannot_be_claimed() {
        let slot = CaptureSlot::new();

        // A late handler for thread 1 loaded the request, then the capturer
        // gave up on it and moved on to thread 2.
        let observed = slot.post(1);
        slot.request.store(IDLE, Ordering::Release);
        let current = slot.post(2);
        assert!(!slot.try_claim(observed, 1));
        assert_eq!(slot.request.load(Ordering::Acquire), current);

        // Same thread, next request.
        let observed = slot.post(1);
        let current = slot.post(1);
        assert!(!slot.try_claim(observed, 1));
        assert!(!slot.try_claim(current, 2));
        assert!(slot.try_claim(current, 1));
    }

    #[test]
    fn test_wait_returns_published_stack() {
        let slot = CaptureSlot::new();
        let request = slot.post(7);
        assert!(slot.try_claim(request, 7));
        unsafe { (&mut (*slot.frames.get()))[..3].copy_from_slice(&[0x1, 0xa, 0xb]) };
        slot.publish(request, 1, 3);

        let stack = slot.wait(request, Duration::from_millis(10)).unwrap();
        assert_eq!(stack, Some(vec![0xa, 0xb]));
        assert_eq!(slot.request.load(Ordering::Acquire), IDLE);
    }

    #[test]
    fn test_unanswered_request_is_withdrawn() {
        let slot = CaptureSlot::new();
        let request = slot.post(7);

        let stack = slot.wait(request, Duration::from_millis(10)).unwrap();
        assert_eq!(stack, None);
        assert_eq!(slot.request.load(Ordering::Acquire), IDLE);
        assert!(!slot.try_claim(request, 7));
    }

    #[test]
    fn test_stalled_handler_fails_capture_until_it_finishes() {
        let slot = CaptureSlot::new();
        let timeout = Duration::from_millis(10);
        let request = slot.post(7);
        assert!(slot.try_claim(request, 7));

        let err = slot.wait(request, timeout).unwrap_err();
        assert!(matches!(err, Error::CaptureStalled { tid: 7, .. }));
        assert!(matches!(
            slot.recover(timeout),
            Err(Error::CaptureStalled { tid: 7, .. })
        ));

        slot.publish(request, 0, 0);
        slot.recover(timeout).unwrap();
        assert!(!slot.stalled.load(Ordering::Acquire));
        assert_eq!(slot.request.load(Ordering::Acquire), IDLE);
    }

    #[test]
    fn test_existing_signal_handler_is_not_replaced() {
        let signal = libc::SIGRTMIN() + 6;
        let previous = unsafe { libc::signal(signal, foreign_handler as libc::sighandler_t) };
        assert_ne!(previous, libc::SIG_ERR);

        let configuration = Configuration {
            capture_signal: Some(signal),
            ..Configuration::default()
        };
        let err = ThreadSnapshot::new(&configuration).unwrap_err();
        assert!(matches!(err, Error::SignalSetup(_)));

        let mut current: libc::sigaction = unsafe { mem::zeroed() };
        unsafe { libc::sigaction(signal, null(), &mut current) };
        assert_eq!(current.sa_sigaction, foreign_handler as libc::sighandler_t);
    }
}
