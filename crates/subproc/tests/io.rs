#![cfg(unix)]

use std::time::{Duration, Instant};

use subproc::{Error, Options, Process, Status, Stream, Timeout};

const MESSAGE: &str = "bytes in are bytes out, stream order preserved";

fn drain_to_strings(process: &mut Process) -> (String, String) {
    let mut out = String::new();
    let mut err = String::new();
    process
        .drain(
            |_, chunk| {
                out.push_str(std::str::from_utf8(chunk).expect("utf-8 stdout"));
                true
            },
            |_, chunk| {
                err.push_str(std::str::from_utf8(chunk).expect("utf-8 stderr"));
                true
            },
        )
        .expect("drain");
    (out, err)
}

fn write_all(process: &mut Process, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = process.write(bytes).expect("write");
        bytes = &bytes[n..];
    }
}

#[test]
fn captures_stdout_to_string() {
    let mut process = Process::new();
    process.start(&["sh", "-c", "ls /"], Options::default()).expect("start");

    let (out, err) = drain_to_strings(&mut process);
    assert!(!out.is_empty());
    assert!(err.is_empty());
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn echoes_stdin_to_stdout() {
    let mut process = Process::new();
    process.start(&["cat"], Options::default()).expect("start");

    write_all(&mut process, MESSAGE.as_bytes());
    process.close(Stream::In);

    let (out, err) = drain_to_strings(&mut process);
    assert_eq!(out, MESSAGE);
    assert!(err.is_empty());
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn duplicates_stdin_to_both_streams() {
    let mut process = Process::new();
    process
        .start(&["sh", "-c", "tee /dev/stderr"], Options::default())
        .expect("start");

    write_all(&mut process, MESSAGE.as_bytes());
    process.close(Stream::In);

    let (out, err) = drain_to_strings(&mut process);
    assert_eq!(out, MESSAGE);
    assert_eq!(err, MESSAGE);
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn initial_input_is_delivered_and_stdin_closed() {
    let options = Options {
        input: Some(MESSAGE.as_bytes().to_vec()),
        ..Options::default()
    };

    let mut process = Process::new();
    process.start(&["cat"], options).expect("start");

    // `input` implies the stdin endpoint is already closed.
    assert_eq!(process.write(b"more"), Err(Error::BrokenPipe));

    let (out, _) = drain_to_strings(&mut process);
    assert_eq!(out, MESSAGE);
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn read_times_out_within_its_bound() {
    let options = Options {
        timeout: Some(Duration::from_millis(200)),
        ..Options::default()
    };

    let mut process = Process::new();
    process.start(&["sleep", "30"], options).expect("start");

    let mut buffer = [0u8; 128];
    let started = Instant::now();
    assert_eq!(process.read(&mut buffer), Err(Error::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(2));

    process.close(Stream::In);
    process.kill().expect("kill");
    assert_eq!(
        process.wait(Timeout::Infinite).expect("wait"),
        subproc::EXIT_SIGKILL
    );

    // With the child gone both output streams report closure.
    assert_eq!(process.read(&mut buffer), Err(Error::BrokenPipe));
}

#[test]
fn zero_timeout_short_circuits_reads_and_writes() {
    let options = Options {
        timeout: Some(Duration::ZERO),
        ..Options::default()
    };

    let mut process = Process::new();
    process.start(&["sleep", "30"], options).expect("start");

    let mut buffer = [0u8; 16];
    assert_eq!(process.read(&mut buffer), Err(Error::TimedOut));
    assert_eq!(process.write(b"x"), Err(Error::TimedOut));

    process.kill().expect("kill");
    process.wait(Timeout::Infinite).expect("wait");
}

#[test]
fn expired_deadline_turns_io_into_timeouts() {
    let options = Options {
        deadline: Some(Duration::from_millis(50)),
        ..Options::default()
    };

    let mut process = Process::new();
    process.start(&["sleep", "30"], options).expect("start");

    std::thread::sleep(Duration::from_millis(80));

    let mut buffer = [0u8; 16];
    assert_eq!(process.read(&mut buffer), Err(Error::TimedOut));
    assert_eq!(process.write(b"x"), Err(Error::TimedOut));

    process.kill().expect("kill");
    process.wait(Timeout::Infinite).expect("wait");
}

#[test]
fn write_to_exited_child_is_broken_pipe() {
    let mut process = Process::new();
    process.start(&["true"], Options::default()).expect("start");
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);

    assert_eq!(process.write(b"anyone home?"), Err(Error::BrokenPipe));
    // The endpoint is closed by the failed write; later writes see the
    // same error without touching the OS.
    assert_eq!(process.write(b"hello?"), Err(Error::BrokenPipe));
}

#[test]
fn empty_write_is_a_no_op() {
    let mut process = Process::new();
    process.start(&["cat"], Options::default()).expect("start");

    assert_eq!(process.write(&[]).expect("write"), 0);

    process.close(Stream::In);
    drain_to_strings(&mut process);
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn close_is_idempotent() {
    let mut process = Process::new();
    process.start(&["cat"], Options::default()).expect("start");

    process.close(Stream::In);
    process.close(Stream::In);
    process.close(Stream::Out);
    process.close(Stream::Out);

    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn drain_flushes_sinks_before_reading() {
    let mut process = Process::new();
    process.start(&["true"], Options::default()).expect("start");

    let mut first = None;
    process
        .drain(
            |stream, chunk| {
                if first.is_none() {
                    first = Some((stream, chunk.len()));
                }
                true
            },
            |_, _| true,
        )
        .expect("drain");

    assert_eq!(first, Some((Stream::In, 0)));
    process.wait(Timeout::Infinite).expect("wait");
}

#[test]
fn drain_stops_when_a_sink_declines() {
    let mut process = Process::new();
    process.start(&["cat"], Options::default()).expect("start");

    write_all(&mut process, b"stop after this");
    process.close(Stream::In);

    let mut chunks = 0;
    process
        .drain(
            |stream, _| {
                if stream == Stream::Out {
                    chunks += 1;
                    return false;
                }
                true
            },
            |_, _| true,
        )
        .expect("drain");
    assert_eq!(chunks, 1);

    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}

#[test]
fn status_moves_through_the_lifecycle() {
    let mut process = Process::new();
    assert_eq!(process.status(), Status::NotStarted);

    process.start(&["true"], Options::default()).expect("start");
    assert_eq!(process.status(), Status::Running);
    assert!(process.pid().is_ok());
    assert_eq!(process.exit_status(), Err(Error::InProgress));

    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
    assert_eq!(process.status(), Status::Exited(0));
    assert_eq!(process.exit_status().expect("exit status"), 0);
}

#[test]
fn start_twice_is_rejected() {
    let mut process = Process::new();
    process.start(&["true"], Options::default()).expect("start");
    assert_eq!(
        process.start(&["true"], Options::default()),
        Err(Error::InvalidArgument)
    );
    process.wait(Timeout::Infinite).expect("wait");
}

#[test]
fn failed_start_restores_not_started() {
    let mut process = Process::new();
    let error = process
        .start(&["subproc-test-missing-binary"], Options::default())
        .expect_err("missing program");
    assert!(matches!(error, Error::System(_)));
    assert_eq!(process.status(), Status::NotStarted);

    // The engine is reusable after a failed start.
    process.start(&["true"], Options::default()).expect("start");
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 0);
}
