//! Process-wide registry of live children.
//!
//! Children are spawned with `kill_on_drop`, which covers normal returns,
//! errors and unwinding panics. It does not cover the host calling
//! `std::process::exit` or being terminated by a signal. The `atexit` hook
//! registered by [`install`] drains the registry on exit, and every
//! registered pid receives SIGKILL.
//!
//! Termination signals belong to the host application. A binary that wants
//! SIGTERM/SIGHUP to kill the children and exit opts in with
//! [`watch_termination_signals`]; the library never installs it itself.
//!
//! SIGINT is deliberately left alone: an interactive Ctrl-C already reaches
//! the whole foreground process group, and the CLI turns it into an orderly
//! teardown.

use std::collections::HashSet;
use std::sync::{Mutex, Once, OnceLock};

static REGISTRY: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();
static INSTALL: Once = Once::new();
static SIGNAL_WATCHER: Once = Once::new();

fn registry() -> &'static Mutex<HashSet<u32>> {
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Install the `atexit` hook. Safe to call any number of times.
pub fn install() {
    INSTALL.call_once(|| {
        // SAFETY: `kill_registered_at_exit` is a plain `extern "C"` function
        // that never unwinds.
        let rc = unsafe { libc::atexit(kill_registered_at_exit) };
        if rc != 0 {
            tracing::warn!("failed to register atexit child cleanup");
        }
    });
}

/// On SIGTERM or SIGHUP, kill every registered child and exit with
/// `128 + signal`. Replaces any handling the host had for those signals.
/// Safe to call any number of times.
pub fn watch_termination_signals() {
    install();
    SIGNAL_WATCHER.call_once(|| {
        let spawned = std::thread::Builder::new()
            .name("localnet-safety-net".to_string())
            .spawn(exit_on_termination_signal);
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to start signal watcher");
        }
    });
}

pub fn register(pid: u32) {
    if let Ok(mut pids) = registry().lock() {
        pids.insert(pid);
    }
}

pub fn unregister(pid: u32) {
    if let Ok(mut pids) = registry().lock() {
        pids.remove(&pid);
    }
}

pub fn is_registered(pid: u32) -> bool {
    registry()
        .lock()
        .map(|pids| pids.contains(&pid))
        .unwrap_or(false)
}

/// SIGKILL every registered child. Returns how many were signalled.
pub fn kill_registered() -> usize {
    // try_lock: this also runs from atexit, where blocking on a lock held by
    // a thread that will never resume would hang the exit.
    let pids: Vec<u32> = match registry().try_lock() {
        Ok(mut pids) => pids.drain().collect(),
        Err(_) => return 0,
    };
    for pid in &pids {
        // SAFETY: kill(2) has no memory-safety preconditions.
        unsafe {
            libc::kill(*pid as libc::pid_t, libc::SIGKILL);
        }
    }
    pids.len()
}

extern "C" fn kill_registered_at_exit() {
    kill_registered();
}

fn exit_on_termination_signal() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::warn!(error = %err, "signal watcher runtime unavailable");
            return;
        }
    };

    runtime.block_on(async {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut hup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            _ => {
                tracing::warn!("could not install SIGTERM/SIGHUP handlers");
                return;
            }
        };

        let code = tokio::select! {
            _ = term.recv() => 128 + libc::SIGTERM,
            _ = hup.recv() => 128 + libc::SIGHUP,
        };
        let killed = kill_registered();
        tracing::warn!(killed, "terminated by signal, killed managed children");
        std::process::exit(code);
    });
}
