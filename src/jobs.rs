use std::collections::HashMap;
use std::io::Write;

use crate::reaper;

/// Bounded job-table capacity, per spec §3 ("a bounded container
/// (capacity ≈ 32)"). Also doubles as the reaper's slot-table size.
pub const MAX_JOBS: usize = 32;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(i32),
}

/// A single tracked job: backgrounded, or a foreground job that got
/// stopped and was moved into the table.
#[derive(Debug)]
pub struct Job {
    pub jid: u32,
    pub pgid: libc::pid_t,
    pub state: JobState,
    /// The original line, trailing `&` and whitespace stripped.
    pub command_text: String,
    pub notified: bool,
    /// Every member pid (the pgid itself, plus the right-hand stage's pid
    /// for a piped job). Needed to reconstruct a full `Launched` when `fg`
    /// resumes a job that's already in the table.
    pub pids: Vec<libc::pid_t>,
    /// Index into the reaper's fixed slot table this job's status updates
    /// arrive through.
    slot: usize,
}

impl Job {
    /// `Running`/`Stopped` label for the `jobs` builtin (spec §6); `Done`
    /// entries are never listed, they're drained as notifications instead.
    pub fn state_label(&self) -> &'static str {
        match self.state {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
            JobState::Done(_) => "Done",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobError {
    JobsFull,
    NoSuchJob,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::JobsFull => write!(f, "ca$h: job table full"),
            JobError::NoSuchJob => write!(f, "ca$h: no such job"),
        }
    }
}

/// In-memory registry of active pipelines, keyed by PGID with a secondary
/// JID index, per spec §3/§4.2.
pub struct JobTable {
    by_pgid: HashMap<libc::pid_t, Job>,
    by_jid: HashMap<u32, libc::pid_t>,
    next_jid: u32,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            by_pgid: HashMap::new(),
            by_jid: HashMap::new(),
            next_jid: 1,
        }
    }

    /// Register a pipeline. Fails with `JobsFull` once 32 non-`Done` slots
    /// are occupied. `notified` starts `true` for `Running` (nothing to
    /// announce yet) and `false` otherwise, per spec §4.2. `pids` is every
    /// member of the pipeline (the pgid itself, plus the right-hand
    /// stage's pid when piped) — the reaper records all of them so it can
    /// match a reaped pid back to this job directly (see reaper.rs).
    pub fn add(
        &mut self,
        pgid: libc::pid_t,
        pids: Vec<libc::pid_t>,
        command_text: String,
        state: JobState,
    ) -> Result<u32, JobError> {
        if self.by_pgid.len() >= MAX_JOBS {
            return Err(JobError::JobsFull);
        }

        let slot = reaper::with_sigchld_blocked(|| reaper::alloc_slot(&pids, matches!(state, JobState::Stopped)))
            .ok_or(JobError::JobsFull)?;

        let jid = self.next_jid;
        self.next_jid += 1;
        let notified = matches!(state, JobState::Running);

        self.by_pgid.insert(
            pgid,
            Job {
                jid,
                pgid,
                state,
                command_text,
                notified,
                pids,
                slot,
            },
        );
        self.by_jid.insert(jid, pgid);
        Ok(jid)
    }

    pub fn find_by_jid(&self, jid: u32) -> Option<&Job> {
        self.by_jid.get(&jid).and_then(|pgid| self.by_pgid.get(pgid))
    }

    pub fn find_by_jid_mut(&mut self, jid: u32) -> Option<&mut Job> {
        let pgid = *self.by_jid.get(&jid)?;
        self.by_pgid.get_mut(&pgid)
    }

    pub fn find_by_pgid(&self, pgid: libc::pid_t) -> Option<&Job> {
        self.by_pgid.get(&pgid)
    }

    pub fn remove(&mut self, pgid: libc::pid_t) -> Option<Job> {
        let job = self.by_pgid.remove(&pgid)?;
        self.by_jid.remove(&job.jid);
        reaper::with_sigchld_blocked(|| reaper::free_slot(job.slot));
        Some(job)
    }

    /// All jobs sorted by JID (ascending), for the `jobs` builtin.
    pub fn snapshot(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.by_pgid.values().collect();
        jobs.sort_by_key(|j| j.jid);
        jobs
    }

    /// Mark a resumed job `Running` again (used by `bg`/`fg` after sending
    /// SIGCONT). Per spec §5, job-table mutation outside the reaper only
    /// happens from the Controller during fg/bg/foreground-wait.
    pub fn mark_running(&mut self, pgid: libc::pid_t) {
        if let Some(job) = self.by_pgid.get_mut(&pgid) {
            job.state = JobState::Running;
            job.notified = true;
            reaper::with_sigchld_blocked(|| reaper::set_slot_running(job.slot));
        }
    }

    /// Pull any state transitions the reaper has observed since the last
    /// call and fold them into the table (§4.3: "Reaper updates"). Must run
    /// before `drain_notifications` so the printed output is current.
    fn sync_from_reaper(&mut self) {
        reaper::with_sigchld_blocked(|| {
            for job in self.by_pgid.values_mut() {
                match reaper::slot_state(job.slot) {
                    reaper::RawState::Stopped if job.state != JobState::Stopped => {
                        job.state = JobState::Stopped;
                        job.notified = false;
                    }
                    reaper::RawState::Done(code) if !matches!(job.state, JobState::Done(_)) => {
                        job.state = JobState::Done(code);
                        job.notified = false;
                    }
                    _ => {}
                }
            }
        });
    }

    /// Print one line per job whose `notified` is false, then mark it
    /// notified; `Done` entries are removed afterward. Per spec §4.2/§6.
    pub fn drain_notifications(&mut self, out: &mut dyn Write) {
        self.sync_from_reaper();

        let mut done_pgids = Vec::new();
        let mut pending: Vec<&mut Job> = self
            .by_pgid
            .values_mut()
            .filter(|j| !j.notified)
            .collect();
        pending.sort_by_key(|j| j.jid);

        for job in pending {
            match job.state {
                JobState::Done(_) => {
                    let _ = writeln!(out, "[{}] Done\t{}", job.jid, job.command_text);
                    done_pgids.push(job.pgid);
                }
                JobState::Stopped => {
                    let _ = writeln!(out, "[{}] Stopped\t{}", job.jid, job.command_text);
                    job.notified = true;
                }
                JobState::Running => {
                    job.notified = true;
                }
            }
        }

        for pgid in done_pgids {
            self.remove(pgid);
        }
    }
}
