mod builtins;
mod controller;
mod editor;
mod job_control;
mod jobs;
mod launcher;
mod parser;
mod reaper;
mod redirect;
mod status;

use std::io::{self, Write};
use std::sync::atomic::Ordering;

use editor::LineEditor;

const BANNER: &str = r"
   _________  $__
  / ___/ __ `/ /
 / /__/ /_/ / /
 \___/\__,_/_/
";

fn print_help() {
    println!("Usage: cash [--help] [--version]");
    println!();
    println!("Builtins: exit, cd [dir], clear, jobs, fg %n, bg %n, pwd, echo, export, unset, type");
    println!("Grammar:  command := token...   pipeline := command ['|' command]   line := pipeline ['&']");
}

fn print_version() {
    println!("ca$h {}", env!("CARGO_PKG_VERSION"));
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help") {
        print_help();
        return;
    }
    if args.iter().any(|a| a == "--version") {
        print_version();
        return;
    }

    // Best-effort cosmetic newline on platforms where SIGINT can still reach
    // this process while the line editor holds raw mode. The shell's actual
    // job-control SIGINT handling (ignoring it once interactive) is installed
    // separately in `Controller::bootstrap` via `libc::signal`, not here.
    let _ = ctrlc::set_handler(|| {
        if !editor::EDITOR_ACTIVE.load(Ordering::Relaxed) {
            println!();
            let _ = io::stdout().flush();
        }
    });

    let mut editor = LineEditor::new();

    let mut controller = match controller::Controller::bootstrap() {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("ca$h: failed to initialize shell: {e}");
            std::process::exit(1);
        }
    };

    if controller.interactive {
        print!("{BANNER}");
        println!("Welcome to ca$h. Type 'exit' to quit.");
        let _ = io::stdout().flush();
    }

    let exit_code = controller.run(&mut editor);
    std::process::exit(exit_code);
}
