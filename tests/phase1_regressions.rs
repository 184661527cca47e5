//! End-to-end scenarios 1, 4, 5 from spec §8: a plain foreground command,
//! a two-stage pipeline, and file redirection.

use std::io::Write;
use std::process::{Command, Stdio};

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

#[test]
fn simple_foreground_command_runs_and_exits_cleanly() {
    let output = run_shell(&["echo hello"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn pipeline_output_appears_on_the_terminal() {
    let output = run_shell(&["printf 'b\\na\\nc\\n' | sort"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let a_pos = stdout.find('a');
    let b_pos = stdout.find('b');
    assert!(a_pos.is_some() && b_pos.is_some(), "stdout was: {stdout}");
    assert!(a_pos < b_pos, "sort output not in order, stdout was: {stdout}");
}

#[test]
fn redirection_copies_input_file_to_output_file() {
    let dir = std::env::temp_dir().join(format!("cash_redir_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input_path = dir.join("in.txt");
    let output_path = dir.join("out.txt");
    std::fs::write(&input_path, "hello from redirection test\n").unwrap();

    let cmd = format!("cat < {} > {}", input_path.display(), output_path.display());
    let output = run_shell(&[cmd.as_str()]);
    assert!(output.status.success(), "shell did not exit cleanly");

    let contents = std::fs::read_to_string(&output_path).expect("read output file");
    assert_eq!(contents, "hello from redirection test\n");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn builtin_redirection_is_ignored_with_a_warning() {
    let dir = std::env::temp_dir().join(format!("cash_builtin_redir_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input_path = dir.join("ignored.txt");
    std::fs::write(&input_path, "ignored").unwrap();

    let cmd = format!("pwd < {}", input_path.display());
    let output = run_shell(&[cmd.as_str()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!stdout.trim().is_empty(), "pwd produced no output, stdout was: {stdout}");
    assert!(
        stderr.contains("redirections are ignored"),
        "expected a warning on stderr, stderr was: {stderr}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cd_with_no_argument_and_home_unset_reports_error_and_keeps_cwd() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cash"))
        .env_remove("HOME")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cash");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "cd").unwrap();
        writeln!(stdin, "pwd").unwrap();
        writeln!(stdin, "exit").unwrap();
    }

    let output = child.wait_with_output().expect("wait output");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("HOME not set"), "stderr was: {stderr}");
    assert!(output.status.success(), "shell did not exit cleanly");
}
