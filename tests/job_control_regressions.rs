//! End-to-end scenarios 2 and 3 from spec §8: a backgrounded job's launch
//! announcement and Done notification, and stop/bg/fg on a job that
//! suspends itself.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

fn spawn_shell() -> std::process::Child {
    Command::new(env!("CARGO_BIN_EXE_cash"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cash")
}

#[test]
fn background_job_announces_jid_and_reports_done_at_next_prompt() {
    let mut child = spawn_shell();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let stdin = child.stdin.as_mut().unwrap();

    writeln!(stdin, "sleep 1 &").unwrap();
    stdin.flush().unwrap();

    let mut announce = String::new();
    stdout.read_line(&mut announce).unwrap();
    assert!(announce.trim_start().starts_with("[1]"), "announce line was: {announce}");

    // Give the background job time to actually finish before we ask for
    // the next notification sweep.
    std::thread::sleep(Duration::from_millis(1500));
    writeln!(stdin, "echo poke").unwrap();
    writeln!(stdin, "exit").unwrap();
    drop(stdin);

    let mut rest = String::new();
    use std::io::Read;
    stdout.read_to_string(&mut rest).unwrap();
    assert!(rest.contains("[1] Done"), "expected a Done notification, rest was: {rest}");
    assert!(rest.contains("sleep 1"), "expected the command text, rest was: {rest}");
}

#[test]
fn jobs_full_rejects_the_next_background_launch() {
    let mut child = spawn_shell();
    let stdin = child.stdin.as_mut().unwrap();
    // MAX_JOBS is 32; 33rd background launch must be rejected.
    for _ in 0..32 {
        writeln!(stdin, "sleep 5 &").unwrap();
    }
    writeln!(stdin, "sleep 5 &").unwrap();
    writeln!(stdin, "exit").unwrap();
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("job table full"), "stderr was: {stderr}");
}

#[test]
fn stopped_job_can_be_backgrounded_then_foregrounded() {
    let mut child = spawn_shell();
    let stdin = child.stdin.as_mut().unwrap();

    // `sh` stops itself with SIGSTOP before sleeping; since it's the sole
    // member of its own process group, the group-wide wait sees it as
    // stopped exactly as Ctrl-Z would produce.
    writeln!(stdin, "sh -c \"kill -STOP $$; sleep 1\"").unwrap();
    writeln!(stdin, "jobs").unwrap();
    writeln!(stdin, "bg %1").unwrap();
    writeln!(stdin, "fg %1").unwrap();
    writeln!(stdin, "exit").unwrap();
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[1] Stopped"), "stdout was: {stdout}");
    assert!(stdout.contains("&"), "expected the bg announcement, stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn fg_on_unknown_job_reports_no_such_job() {
    let mut child = spawn_shell();
    let stdin = child.stdin.as_mut().unwrap();
    writeln!(stdin, "fg %99").unwrap();
    writeln!(stdin, "exit").unwrap();
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no such job"), "stderr was: {stderr}");
}
