//! The shell must survive signals that land on it or on a pipeline it
//! launched: it ignores job-control signals itself (spec §4.5 bootstrap)
//! and keeps functioning after a pipeline stage is killed by SIGPIPE.

#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::process::{Command, Stdio};

#[cfg(unix)]
fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cash"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cash");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

#[cfg(unix)]
#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // yes writes indefinitely; head -1 exits after one line, closing the
    // read end. yes receives SIGPIPE (reset to SIG_DFL pre-exec) and is
    // killed by it; the shell itself never sees SIGPIPE and keeps going.
    let output = run_shell(&["yes | head -1", "echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[cfg(unix)]
#[test]
fn shell_ignores_sigtstp_sent_to_its_own_group() {
    // The shell's own pgid is its pid here (it's the session's process
    // group leader under the test harness). Sending SIGTSTP to that group
    // must not stop it, since bootstrap installs SIG_IGN for it.
    let mut child = Command::new(env!("CARGO_BIN_EXE_cash"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cash");
    let pid = child.id();

    {
        let stdin = child.stdin.as_mut().unwrap();
        writeln!(stdin, "echo BEFORE").unwrap();
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTSTP);
    }
    {
        let stdin = child.stdin.as_mut().unwrap();
        writeln!(stdin, "echo AFTER").unwrap();
        writeln!(stdin, "exit").unwrap();
    }

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("BEFORE"), "stdout was: {stdout}");
    assert!(stdout.contains("AFTER"), "stdout was: {stdout}");
}
