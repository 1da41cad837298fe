//! Runs the program given on the command line and captures both of its
//! output streams into strings.
//!
//! Usage: `cargo run --example drain -- echo hello`

use subproc::{Options, Process, Timeout};

fn main() -> subproc::Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        eprintln!("usage: drain <program> [args...]");
        std::process::exit(64);
    }

    let mut process = Process::new();
    process.start(&argv, Options::default())?;

    let mut output = String::new();
    let mut errors = String::new();
    process.drain(
        |_, chunk| {
            output.push_str(&String::from_utf8_lossy(chunk));
            true
        },
        |_, chunk| {
            errors.push_str(&String::from_utf8_lossy(chunk));
            true
        },
    )?;

    let status = process.wait(Timeout::Infinite)?;

    print!("{output}");
    eprint!("{errors}");
    std::process::exit(status.clamp(0, 255));
}
