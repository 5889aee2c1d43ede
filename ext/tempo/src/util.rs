use std::fs;
use std::io;

pub fn current_tid() -> libc::pid_t {
    unsafe { libc::gettid() }
}

/// Kernel thread ids of every thread in the current process.
pub fn list_thread_ids() -> io::Result<Vec<libc::pid_t>> {
    let mut tids = vec![];
    for entry in fs::read_dir("/proc/self/task")? {
        let entry = entry?;
        // Entries are named after the thread id; anything else is ignored.
        if let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<libc::pid_t>().ok())
        {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// The name of a thread as set by `pthread_setname_np` (at most 15 bytes).
pub fn thread_name(tid: libc::pid_t) -> Option<String> {
    fs::read_to_string(format!("/proc/self/task/{}/comm", tid))
        .ok()
        .map(|name| name.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    #[test]
    fn test_list_thread_ids_contains_current_thread() {
        let tids = list_thread_ids().unwrap();
        assert!(tids.contains(&current_tid()));
    }

    #[test]
    fn test_thread_name() {
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tempo-util".to_owned())
            .spawn(move || {
                tx.send(current_tid()).unwrap();
                let _ = done_rx.recv();
            })
            .unwrap();

        let tid = rx.recv().unwrap();
        assert_eq!(thread_name(tid).as_deref(), Some("tempo-util"));
        drop(done_tx);
        handle.join().unwrap();
    }
}
