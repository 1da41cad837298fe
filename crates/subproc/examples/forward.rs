//! Forwards a child's output to the parent's own streams as it arrives,
//! chunk by chunk, instead of accumulating it.
//!
//! Usage: `cargo run --example forward -- cmake --help`

use std::io::Write;

use subproc::{Options, Process, Stop, StopActions, Timeout};

fn main() -> subproc::Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        eprintln!("usage: forward <program> [args...]");
        std::process::exit(64);
    }

    // Give the child five seconds to wind down on its own before it is
    // terminated, however this program exits.
    let options = Options {
        stop: StopActions {
            first: Stop::Wait(Timeout::Finite(std::time::Duration::from_secs(5))),
            second: Stop::Terminate(Timeout::Infinite),
            third: Stop::Noop,
        },
        ..Options::default()
    };

    let mut process = Process::new();
    process.start(&argv, options)?;

    process.drain(
        |_, chunk| std::io::stdout().write_all(chunk).is_ok(),
        |_, chunk| std::io::stderr().write_all(chunk).is_ok(),
    )?;

    let status = process.wait(Timeout::Infinite)?;
    std::process::exit(status.clamp(0, 255));
}
