//! Main loop, foreground-wait, `fg`/`bg`/`jobs` dispatch, shell bootstrap
//! (spec §4.5).

use std::collections::HashSet;
use std::io::{self, Write};

use crate::builtins::{self, BuiltinAction};
use crate::editor::LineEditor;
use crate::job_control::{self, ForegroundTerminalGuard};
use crate::jobs::{JobState, JobTable};
use crate::launcher::{self, Launched};
use crate::parser::{self, ParsedLine, Pipeline};

/// Signals the shell itself ignores once it owns the terminal (spec §4.5
/// "Shell bootstrap"). A child resets these back to `SIG_DFL` in
/// `launcher::reset_child_signals_and_group` before it execs.
const SHELL_IGNORED_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

pub struct Controller {
    job_table: JobTable,
    pub interactive: bool,
}

/// Outcome of waiting for a foreground process group.
enum WaitOutcome {
    Exited(i32),
    Stopped,
}

impl Controller {
    /// Shell bootstrap: if interactive, grab the terminal's foreground
    /// group and install the ignored-signal set, then install the
    /// Reaper. Falls back to non-interactive mode if the terminal can't
    /// be acquired (spec §7: "cannot grab the terminal" is the one fatal
    /// initialization problem, and it degrades rather than aborts).
    pub fn bootstrap() -> io::Result<Self> {
        let interactive = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        let shell_pgid = unsafe { libc::getpgrp() };

        if interactive {
            acquire_foreground(shell_pgid);
            for &sig in &SHELL_IGNORED_SIGNALS {
                if unsafe { libc::signal(sig, libc::SIG_IGN) } == libc::SIG_ERR {
                    return Err(io::Error::last_os_error());
                }
            }
        }

        crate::reaper::install()?;

        Ok(Controller {
            job_table: JobTable::new(),
            interactive,
        })
    }

    /// The read-parse-dispatch loop. Returns the exit status for
    /// `std::process::exit`.
    pub fn run(&mut self, editor: &mut LineEditor) -> i32 {
        let prompt = "ca$h> ";
        let mut last_status = 0;

        loop {
            self.job_table.drain_notifications(&mut io::stdout());

            let line = match editor.read_line(prompt) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(_) => break,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            editor.add_to_history(trimmed);

            let parsed = match parser::parse_line(trimmed, builtins::is_builtin) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{e}");
                    last_status = 2;
                    continue;
                }
            };

            match self.dispatch(parsed, trimmed) {
                Dispatch::Continue(code) => last_status = code,
                Dispatch::Exit(code) => {
                    last_status = code;
                    break;
                }
            }
        }

        last_status
    }

    fn dispatch(&mut self, parsed: ParsedLine, command_text: &str) -> Dispatch {
        let ParsedLine { pipeline, background } = parsed;

        if let Pipeline::Single(cmd) = &pipeline {
            match cmd.program() {
                "jobs" => return Dispatch::Continue(self.builtin_jobs()),
                "fg" => return Dispatch::Continue(self.builtin_fg(&cmd.args)),
                "bg" => return Dispatch::Continue(self.builtin_bg(&cmd.args)),
                name if builtins::is_builtin(name) => {
                    if !cmd.redirections.is_empty() {
                        eprintln!("ca$h: {name}: redirections are ignored on this builtin");
                    }
                    let mut stdout = io::stdout();
                    let mut stderr = io::stderr();
                    return match builtins::execute(name, &cmd.args, &mut stdout, &mut stderr) {
                        BuiltinAction::Continue(code) => Dispatch::Continue(code),
                        BuiltinAction::Exit(code) => Dispatch::Exit(code),
                    };
                }
                _ => {}
            }
        }

        let launched = match launcher::launch(&pipeline) {
            Ok(launched) => launched,
            Err(e) => return Dispatch::Continue(e.report()),
        };

        if background {
            match self.job_table.add(
                launched.pgid,
                launched.pids.clone(),
                command_text.to_string(),
                JobState::Running,
            ) {
                Ok(jid) => println!("[{jid}] {}", launched.pgid),
                Err(e) => eprintln!("{e}"),
            }
            return Dispatch::Continue(0);
        }

        Dispatch::Continue(self.foreground_wait(&launched, command_text, false, None))
    }

    /// spec §4.5 "Foreground-wait". `send_sigcont` is set when resuming a
    /// stopped job via `fg`; `existing_jid` is that job's table entry,
    /// removed on exit rather than inserted fresh.
    fn foreground_wait(
        &mut self,
        launched: &Launched,
        command_text: &str,
        send_sigcont: bool,
        existing_jid: Option<u32>,
    ) -> i32 {
        let guard = match ForegroundTerminalGuard::new(launched.pgid) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("ca$h: failed to hand the terminal to the job: {e}");
                None
            }
        };

        if send_sigcont {
            if let Err(e) = job_control::send_continue_to_group(launched.pgid) {
                eprintln!("ca$h: failed to send SIGCONT: {e}");
            }
        }

        let outcome = wait_for_group(launched.pgid, &launched.pids);
        drop(guard); // reclaims the terminal for the shell's own group

        match outcome {
            WaitOutcome::Stopped => {
                if let Some(jid) = existing_jid {
                    if let Some(job) = self.job_table.find_by_jid_mut(jid) {
                        job.state = JobState::Stopped;
                        job.notified = false;
                    }
                } else {
                    match self.job_table.add(
                        launched.pgid,
                        launched.pids.clone(),
                        command_text.to_string(),
                        JobState::Stopped,
                    ) {
                        Ok(jid) => println!("[{jid}] Stopped\t{command_text}"),
                        Err(e) => eprintln!("{e}"),
                    }
                }
                0
            }
            WaitOutcome::Exited(code) => {
                if let Some(jid) = existing_jid {
                    if let Some(pgid) = self.job_table.find_by_jid(jid).map(|j| j.pgid) {
                        self.job_table.remove(pgid);
                    }
                }
                code
            }
        }
    }

    /// `jobs` — drain first so the listing is current, then print every
    /// tracked entry (spec §4.5/§6).
    fn builtin_jobs(&mut self) -> i32 {
        let mut stdout = io::stdout();
        self.job_table.drain_notifications(&mut stdout);
        for job in self.job_table.snapshot() {
            let _ = writeln!(stdout, "[{}] {} ({})\t{}", job.jid, job.pgid, job.state_label(), job.command_text);
        }
        0
    }

    /// `fg %<jid>` — bring a job to the foreground; SIGCONT if stopped.
    fn builtin_fg(&mut self, args: &[String]) -> i32 {
        let jid = match parse_jobspec(args) {
            Ok(jid) => jid,
            Err(msg) => {
                eprintln!("{msg}");
                return 1;
            }
        };

        let Some(job) = self.job_table.find_by_jid(jid) else {
            eprintln!("ca$h: fg: %{jid}: no such job");
            return 1;
        };

        let command_text = job.command_text.clone();
        let pgid = job.pgid;
        let pids = job.pids.clone();
        let send_sigcont = matches!(job.state, JobState::Stopped);
        println!("{command_text}");

        let launched = Launched { pgid, pids };
        self.foreground_wait(&launched, &command_text, send_sigcont, Some(jid))
    }

    /// `bg %<jid>` — resume a stopped job in the background.
    fn builtin_bg(&mut self, args: &[String]) -> i32 {
        let jid = match parse_jobspec(args) {
            Ok(jid) => jid,
            Err(msg) => {
                eprintln!("{msg}");
                return 1;
            }
        };

        let Some(job) = self.job_table.find_by_jid(jid) else {
            eprintln!("ca$h: bg: %{jid}: no such job");
            return 1;
        };

        if matches!(job.state, JobState::Running) {
            eprintln!("ca$h: bg: %{jid}: job already in background");
            return 1;
        }

        let pgid = job.pgid;
        let command_text = job.command_text.clone();
        if let Err(e) = job_control::send_continue_to_group(pgid) {
            eprintln!("ca$h: bg: failed to send SIGCONT: {e}");
            return 1;
        }
        self.job_table.mark_running(pgid);
        println!("[{jid}] {command_text} &");
        0
    }
}

enum Dispatch {
    Continue(i32),
    Exit(i32),
}

fn parse_jobspec(args: &[String]) -> Result<u32, String> {
    let spec = args.first().ok_or_else(|| "ca$h: usage: fg|bg %<jid>".to_string())?;
    let digits = spec.strip_prefix('%').unwrap_or(spec);
    digits.parse::<u32>().map_err(|_| format!("ca$h: invalid job spec: {spec}"))
}

/// Wait on the negative PGID until every member of `pids` has been
/// reaped, or any member is reported stopped (spec §4.5 step 3: since
/// Ctrl-Z delivers SIGTSTP to the whole foreground group at once, seeing
/// one member stop means the job is stopped). `ECHILD` mid-loop is
/// treated as "job is gone" (spec §7 "Wait races").
///
/// The whole loop runs with SIGCHLD blocked (spec §5): foreground members
/// aren't in the reaper's slot table, so if the async handler's own
/// `waitpid(-1, WNOHANG, ...)` reaped one of them first, this loop would
/// either hang waiting on a group that's already gone or read back
/// `ECHILD` and report the wrong exit status. Blocking the signal for the
/// duration means only this loop's own blocking `waitpid` ever consumes
/// a foreground member's status.
fn wait_for_group(pgid: libc::pid_t, pids: &[libc::pid_t]) -> WaitOutcome {
    crate::reaper::with_sigchld_blocked(|| {
        let mut remaining: HashSet<libc::pid_t> = pids.iter().copied().collect();
        let last_pid = *pids.last().expect("a launched pipeline has at least one member");
        let mut last_exit_code = 0;

        loop {
            if remaining.is_empty() {
                return WaitOutcome::Exited(last_exit_code);
            }

            let mut raw_status: libc::c_int = 0;
            let waited = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };

            if waited < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code) if code == libc::EINTR => continue,
                    Some(code) if code == libc::ECHILD => return WaitOutcome::Exited(last_exit_code),
                    _ => return WaitOutcome::Exited(last_exit_code),
                }
            }

            if unsafe { libc::WIFSTOPPED(raw_status) } {
                return WaitOutcome::Stopped;
            }

            if !remaining.remove(&waited) {
                continue;
            }

            if waited == last_pid {
                last_exit_code = crate::status::exit_code_from_wait_status(raw_status).unwrap_or(1);
            }
        }
    })
}

/// spec §4.5 "Shell bootstrap": loop until the shell's own process group
/// is the terminal's foreground group. A shell that is itself launched
/// in the background has no business holding job control; per spec it
/// forces the issue by killing its own group rather than stopping
/// quietly, since there is no parent shell here to eventually foreground it.
fn acquire_foreground(shell_pgid: libc::pid_t) {
    loop {
        let fg_pgid = unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) };
        if fg_pgid == shell_pgid {
            return;
        }
        unsafe { libc::kill(-shell_pgid, libc::SIGKILL) };
    }
}
