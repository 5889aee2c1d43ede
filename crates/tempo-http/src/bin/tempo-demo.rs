//! Runs threads that sleep, spin, yield and block in various ways, and serves
//! the wall-clock profiling endpoint on 127.0.0.1:6060.
//!
//!     go tool pprof -http=: 'http://127.0.0.1:6060/debug/tempo/wall?seconds=5'

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tempo::Configuration;
use tempo_http::{router, ProfilerState, WALL_PATH};

const LISTEN_ADDR: &str = "127.0.0.1:6060";

fn sleep_loop() {
    loop {
        thread::sleep(Duration::from_secs(1));
    }
}

fn spin_loop() {
    let mut n: u64 = 0;
    loop {
        n = std::hint::black_box(n.wrapping_add(1));
    }
}

fn yield_loop() {
    loop {
        thread::yield_now();
    }
}

fn mutex_lock(mutex: Arc<Mutex<()>>) {
    let _guard = mutex.lock();
}

fn chan_write(tx: mpsc::SyncSender<i32>) {
    let _ = tx.send(1);
}

fn chan_read(rx: mpsc::Receiver<i32>) {
    let _ = rx.recv();
}

fn spawn_named<F>(name: &str, f: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .with_context(|| format!("failed to spawn {}", name))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .format_module_path(false)
        .init();

    spawn_named("sleep-loop", sleep_loop)?;
    spawn_named("spin-loop", spin_loop)?;
    spawn_named("yield-loop", yield_loop)?;

    let mutex = Arc::new(Mutex::new(()));
    let held = Arc::clone(&mutex);
    let _held_guard = held.lock();
    spawn_named("mutex-lock", move || mutex_lock(mutex))?;

    // Rendezvous channels whose other end never shows up.
    let (write_tx, _write_rx) = mpsc::sync_channel(0);
    spawn_named("chan-write", move || chan_write(write_tx))?;
    let (_read_tx, read_rx) = mpsc::sync_channel(0);
    spawn_named("chan-read", move || chan_read(read_rx))?;

    let configuration = Configuration {
        propagate_labels: true,
        ..Configuration::default()
    };
    let state = ProfilerState::for_current_process(configuration)?;

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR)
        .await
        .with_context(|| format!("failed to bind {}", LISTEN_ADDR))?;
    log::info!("Serving http://{}{}", LISTEN_ADDR, WALL_PATH);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
