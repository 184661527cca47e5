//! Fork/pipe/exec orchestration (spec §4.4).
//!
//! Builtins never reach this module — the parser rejects them inside a
//! pipeline (`BuiltinInPipeline`), and a single-command builtin is
//! dispatched by the Controller in-process before the Launcher is ever
//! consulted (spec §4.4 step 1). Everything here forks a real child.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use crate::parser::{self, Pipeline};
use crate::redirect::{RedirectTarget, Redirection};

/// Signals a spawned child resets to `SIG_DFL` before exec, per spec §4.4
/// step 2. `SIG_IGN` survives `exec()`, so without this reset a pipeline
/// stage would inherit the shell's ignored-signal set and itself ignore
/// Ctrl-C/Ctrl-Z.
const CHILD_RESET_SIGNALS: [libc::c_int; 6] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGCHLD,
];

/// A launched pipeline, handed back to the Controller for either job-table
/// registration (background) or a foreground-wait (spec §4.4 "Foreground
/// vs background").
pub struct Launched {
    /// The pipeline's process group id: the leader's pid for a single
    /// command, or the left stage's pid for a two-stage pipeline.
    pub pgid: libc::pid_t,
    /// Every member pid, in launch order. The last entry is the stage
    /// whose exit status becomes the pipeline's reported status.
    pub pids: Vec<libc::pid_t>,
}


#[derive(Debug)]
pub enum LaunchError {
    /// `Command::spawn` failed for the named program — either the
    /// program doesn't exist (spec §7 `ExecFailed`) or the fork itself
    /// could not be performed (resource limits, etc).
    Spawn(String, std::io::Error),
    PipeCreateFailed(std::io::Error),
    /// The named redirection file failed to open (spec §7
    /// `OpenRedirectionFailed`).
    OpenRedirectionFailed(String, std::io::Error),
}

impl LaunchError {
    /// Reports the error to standard error with the `ca$h: ` prefix and
    /// returns the exit code the Controller should propagate as the
    /// pipeline's status (spec §7's 127/126 "not found" vs. "not
    /// executable" convention for `Spawn`; 1 for everything else).
    pub fn report(&self) -> i32 {
        match self {
            LaunchError::Spawn(program, e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!("ca$h: command not found: {program}");
                127
            }
            LaunchError::Spawn(program, e) => {
                eprintln!("ca$h: {program}: {e}");
                126
            }
            LaunchError::PipeCreateFailed(e) => {
                eprintln!("ca$h: failed to create pipe: {e}");
                1
            }
            LaunchError::OpenRedirectionFailed(path, e) => {
                eprintln!("ca$h: {path}: {e}");
                1
            }
        }
    }
}

/// Launch a parsed pipeline. On success, the child(ren) are already
/// running in their own process group; the caller is responsible for the
/// race-safe parent-side `setpgid` (already performed here) and for
/// deciding whether to register the result as a background Job or wait on
/// it directly.
pub fn launch(pipeline: &Pipeline) -> Result<Launched, LaunchError> {
    match pipeline {
        Pipeline::Single(cmd) => launch_single(cmd),
        Pipeline::Piped(left, right) => launch_piped(left, right),
    }
}

fn launch_single(cmd: &parser::Command) -> Result<Launched, LaunchError> {
    let stdin = resolve_input(&cmd.redirections)?;
    let stdout = resolve_output(&cmd.redirections)?;

    let mut process = Command::new(cmd.program());
    process.args(&cmd.args[1..]);
    process.stdin(stdin).stdout(stdout).stderr(Stdio::inherit());
    reset_child_signals_and_group(&mut process, None);

    let program = cmd.program().to_string();
    let child = process
        .spawn()
        .map_err(|e| LaunchError::Spawn(program, e))?;
    let pid = child.id() as libc::pid_t;
    // Race-safe parent-side setpgid: whichever of this call and the
    // child's own pre_exec setpgid wins, the child ends up in the right
    // group before any wait call observes it (spec §5 ordering guarantee).
    set_process_group(pid, pid);
    // The Controller reaps this pgid itself, either synchronously in
    // foreground-wait or asynchronously through the Reaper once
    // backgrounded; dropping `child` here just discards the spawn
    // handle, it does not wait or kill.
    drop(child);

    Ok(Launched { pgid: pid, pids: vec![pid] })
}

fn launch_piped(left: &parser::Command, right: &parser::Command) -> Result<Launched, LaunchError> {
    let (reader, writer) = os_pipe::pipe().map_err(LaunchError::PipeCreateFailed)?;

    let left_stdin = resolve_input(&left.redirections)?;

    let mut left_process = Command::new(left.program());
    left_process.args(&left.args[1..]);
    left_process
        .stdin(left_stdin)
        .stdout(Stdio::from(writer))
        .stderr(Stdio::inherit());
    reset_child_signals_and_group(&mut left_process, None);

    let left_child = match left_process.spawn() {
        Ok(child) => child,
        Err(e) => return Err(LaunchError::Spawn(left.program().to_string(), e)),
    };
    let left_pid = left_child.id() as libc::pid_t;
    set_process_group(left_pid, left_pid);

    // The write end moved into left_process's stdio and was closed in
    // this process once spawn() duplicated it into the child; only the
    // read end remains here, headed into the right process next. No
    // stray copy of either pipe end survives in the shell (spec §5).

    let right_stdout = match resolve_output(&right.redirections) {
        Ok(stdio) => stdio,
        Err(e) => {
            kill_and_reap(left_pid);
            return Err(e);
        }
    };

    let mut right_process = Command::new(right.program());
    right_process.args(&right.args[1..]);
    right_process
        .stdin(reader)
        .stdout(right_stdout)
        .stderr(Stdio::inherit());
    reset_child_signals_and_group(&mut right_process, Some(left_pid));

    let right_child = match right_process.spawn() {
        Ok(child) => child,
        Err(e) => {
            // spec §4.4 step 3: second fork failed — kill and reap the
            // left child, then return the error. The pipe ends are
            // already closed on our side (moved into left_process/here).
            kill_and_reap(left_pid);
            return Err(LaunchError::Spawn(right.program().to_string(), e));
        }
    };
    let right_pid = right_child.id() as libc::pid_t;
    set_process_group(right_pid, left_pid);

    drop(left_child);
    drop(right_child);

    Ok(Launched { pgid: left_pid, pids: vec![left_pid, right_pid] })
}

/// Resets signal dispositions ignored by the shell back to default and
/// joins `target_pgid` (or creates a new group equal to its own pid when
/// `target_pgid` is `None`), all inside `pre_exec` — i.e. in the child,
/// after fork, before exec (spec §4.4 step 2).
fn reset_child_signals_and_group(process: &mut Command, target_pgid: Option<libc::pid_t>) {
    unsafe {
        process.pre_exec(move || {
            for &sig in &CHILD_RESET_SIGNALS {
                if libc::signal(sig, libc::SIG_DFL) == libc::SIG_ERR {
                    return Err(std::io::Error::last_os_error());
                }
            }
            let pgid = target_pgid.unwrap_or(0);
            if libc::setpgid(0, pgid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Race-safe `setpgid(pid, pgid)` from the parent side (spec §4.4 step 3).
fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) {
    if let Err(e) = crate::job_control::set_process_group(pid, pgid) {
        eprintln!("ca$h: setpgid({pid}, {pgid}): {e}");
    }
}

/// Send SIGKILL to the pipeline group and reap the left child, used when
/// the right fork of a two-stage pipeline fails (spec §4.4 step 3 /
/// spec §7 "Launch" errors).
fn kill_and_reap(pgid: libc::pid_t) {
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
        let mut status: libc::c_int = 0;
        loop {
            let rc = libc::waitpid(pgid, &mut status, 0);
            if rc >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                break;
            }
        }
    }
}

fn resolve_input(redirections: &[Redirection]) -> Result<Stdio, LaunchError> {
    for redir in redirections {
        if let RedirectTarget::FileRead(path) = &redir.target {
            let file = OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| LaunchError::OpenRedirectionFailed(path.clone(), e))?;
            return Ok(Stdio::from(file));
        }
    }
    Ok(Stdio::inherit())
}

fn resolve_output(redirections: &[Redirection]) -> Result<Stdio, LaunchError> {
    for redir in redirections {
        if let RedirectTarget::File(path) = &redir.target {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode_0644()
                .open(path)
                .map_err(|e| LaunchError::OpenRedirectionFailed(path.clone(), e))?;
            return Ok(Stdio::from(file));
        }
    }
    Ok(Stdio::inherit())
}

/// Extension so `OpenOptions` reads like spec §4.4's "mode 0644" literally
/// at the call site, without pulling in a whole permissions type for one
/// constant.
trait Mode0644 {
    fn mode_0644(&mut self) -> &mut Self;
}

impl Mode0644 for OpenOptions {
    fn mode_0644(&mut self) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(0o644)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Command;
    use crate::redirect::Redirection;
    use std::io::Read;

    fn cmd(args: &[&str]) -> Command {
        Command {
            args: args.iter().map(|s| s.to_string()).collect(),
            redirections: Vec::new(),
        }
    }

    #[test]
    fn launch_single_runs_and_is_waitable() {
        let launched = launch_single(&cmd(&["true"])).unwrap();
        assert!(launched.pgid > 0);
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(launched.pgid, &mut status, 0) };
        assert_eq!(rc, launched.pgid);
        assert!(unsafe { libc::WIFEXITED(status) });
    }

    #[test]
    fn launch_single_applies_input_and_output_redirection() {
        let dir = std::env::temp_dir();
        let input_path = dir.join(format!("cash_launcher_test_in_{}", std::process::id()));
        let output_path = dir.join(format!("cash_launcher_test_out_{}", std::process::id()));
        std::fs::write(&input_path, b"hello\n").unwrap();

        let mut c = cmd(&["cat"]);
        c.redirections.push(Redirection::input(input_path.to_str().unwrap().to_string()));
        c.redirections.push(Redirection::output(output_path.to_str().unwrap().to_string()));

        let launched = launch_single(&c).unwrap();
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(launched.pgid, &mut status, 0) };

        let mut out = String::new();
        std::fs::File::open(&output_path).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello\n");

        let _ = std::fs::remove_file(&input_path);
        let _ = std::fs::remove_file(&output_path);
    }

    #[test]
    fn launch_piped_joins_one_process_group() {
        let left = cmd(&["printf", "a\\nb\\nc\\n"]);
        let right = cmd(&["wc", "-l"]);
        let launched = launch_piped(&left, &right).unwrap();

        let mut reaped = 0;
        let mut status: libc::c_int = 0;
        while reaped < 2 {
            let rc = unsafe { libc::waitpid(-launched.pgid, &mut status, 0) };
            if rc > 0 {
                reaped += 1;
            } else {
                break;
            }
        }
        assert_eq!(reaped, 2);
    }

    #[test]
    fn spawn_error_reports_127_for_missing_program() {
        let launched = launch_single(&cmd(&["cash-test-definitely-not-a-real-program"]));
        assert!(matches!(launched, Err(LaunchError::Spawn(_, _))));
        assert_eq!(launched.unwrap_err().report(), 127);
    }
}
