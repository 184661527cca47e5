//! SIGCHLD-driven child-status reaper (spec §4.3).
//!
//! The signal handler runs in async-signal context and must not allocate,
//! lock, or touch the `JobTable`'s owned strings directly — see spec §9's
//! design note. Instead it only flips fixed-size atomic slots; the main
//! thread is the sole allocator/deallocator of a slot and is the only
//! place that ever turns a slot transition into a `Job` mutation
//! (`JobTable::sync_from_reaper`).

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use crate::jobs::MAX_JOBS;
use crate::status;

const INVALID: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;
const DONE: u8 = 3;

/// A pipeline has at most two members (spec.md fixes pipelines at one
/// pipe/two stages), so each slot only ever needs to remember up to two
/// member pids. Unused member slots hold `0`, which is never a valid pid.
const MAX_MEMBERS: usize = 2;

struct Slot {
    state: AtomicU8,
    members: [AtomicI32; MAX_MEMBERS],
    exit_code: AtomicI32,
}

impl Slot {
    const fn new() -> Self {
        Slot {
            state: AtomicU8::new(INVALID),
            members: [AtomicI32::new(0), AtomicI32::new(0)],
            exit_code: AtomicI32::new(0),
        }
    }
}

static SLOTS: [Slot; MAX_JOBS] = [const { Slot::new() }; MAX_JOBS];

/// A transition observed for a slot, as read by the main thread.
pub enum RawState {
    Invalid,
    Running,
    Stopped,
    Done(i32),
}

/// Run `f` with SIGCHLD blocked in this thread's signal mask. The shell is
/// single-threaded, so this is sufficient to keep the reaper from
/// preempting a table mutation mid-flight (spec §5: "Around any
/// main-thread operation that allocates or frees a slot's command text,
/// SIGCHLD should be blocked").
pub fn with_sigchld_blocked<R>(f: impl FnOnce() -> R) -> R {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGCHLD);
        let mut old: libc::sigset_t = std::mem::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old);
        let result = f();
        libc::pthread_sigmask(libc::SIG_SETMASK, &old, std::ptr::null_mut());
        result
    }
}

/// Claim a free slot for a newly launched pipeline, recording every member
/// pid (up to [`MAX_MEMBERS`]) so the handler can match a reaped pid
/// straight back to its slot without ever needing to resolve a pgid after
/// the fact (see [`handle_sigchld`]'s doc comment for why that matters).
/// Caller must already hold SIGCHLD blocked (see [`with_sigchld_blocked`]).
pub fn alloc_slot(pids: &[libc::pid_t], start_stopped: bool) -> Option<usize> {
    for (idx, slot) in SLOTS.iter().enumerate() {
        if slot.state.load(Ordering::Relaxed) == INVALID {
            for (i, member) in slot.members.iter().enumerate() {
                member.store(pids.get(i).copied().unwrap_or(0), Ordering::Relaxed);
            }
            slot.exit_code.store(0, Ordering::Relaxed);
            slot.state.store(
                if start_stopped { STOPPED } else { RUNNING },
                Ordering::Release,
            );
            return Some(idx);
        }
    }
    None
}

/// Release a slot once its job has been removed from the table. Caller
/// must hold SIGCHLD blocked.
pub fn free_slot(idx: usize) {
    SLOTS[idx].state.store(INVALID, Ordering::Release);
    for member in &SLOTS[idx].members {
        member.store(0, Ordering::Relaxed);
    }
}

/// Reset a slot to `Running`, used when `bg`/`fg` resumes a stopped job.
/// Caller must hold SIGCHLD blocked.
pub fn set_slot_running(idx: usize) {
    SLOTS[idx].state.store(RUNNING, Ordering::Release);
}

/// Read the current state of a slot. Caller must hold SIGCHLD blocked so
/// the read is consistent with a concurrently-arriving signal.
pub fn slot_state(idx: usize) -> RawState {
    match SLOTS[idx].state.load(Ordering::Acquire) {
        RUNNING => RawState::Running,
        STOPPED => RawState::Stopped,
        DONE => RawState::Done(SLOTS[idx].exit_code.load(Ordering::Relaxed)),
        _ => RawState::Invalid,
    }
}

/// Install the SIGCHLD handler with `SA_RESTART`, per spec §4.3.
pub fn install() -> std::io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigchld as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;

        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// The SIGCHLD handler. Async-signal-safe: no allocation, no locking, no
/// formatted I/O; only non-blocking `waitpid` and atomic stores.
///
/// `waitpid` has already reaped the child by the time it returns `pid`, so
/// the child no longer exists for `getpgid(pid)` to resolve — that call
/// would return `-1`/`ESRCH` for every exited or signal-killed child,
/// silently dropping every `Done` transition. Instead, `alloc_slot`
/// records each job's member pids up front, so the handler matches the
/// already-reaped `pid` directly against those recorded members.
extern "C" fn handle_sigchld(_signal: libc::c_int) {
    let saved_errno = unsafe { *libc::__errno_location() };

    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut raw_status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };

        if pid <= 0 {
            break;
        }

        let Some(slot) = find_slot_by_pid(pid) else {
            // Either a foreground process reaped here ahead of the
            // Controller's own waitpid, or a group this shell never
            // tracked. Spec §4.3 step 1: ignore.
            continue;
        };

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            slot.state.store(STOPPED, Ordering::Release);
        } else if unsafe { libc::WIFCONTINUED(raw_status) } {
            slot.state.store(RUNNING, Ordering::Release);
        } else if let Some(code) = status::exit_code_from_wait_status(raw_status) {
            slot.exit_code.store(code, Ordering::Relaxed);
            slot.state.store(DONE, Ordering::Release);
        }
    }

    unsafe { *libc::__errno_location() = saved_errno };
}

fn find_slot_by_pid(pid: libc::pid_t) -> Option<&'static Slot> {
    SLOTS.iter().find(|slot| {
        slot.state.load(Ordering::Relaxed) != INVALID
            && slot.members.iter().any(|m| m.load(Ordering::Relaxed) == pid)
    })
}
