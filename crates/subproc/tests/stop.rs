#![cfg(unix)]

use std::time::{Duration, Instant};

use subproc::{
    Error, Options, Process, Status, Stop, StopActions, Timeout, EXIT_SIGKILL, EXIT_SIGTERM,
};

fn start_sleeper(options: Options) -> Process {
    let mut process = Process::new();
    process.start(&["sleep", "30"], options).expect("start");
    process
}

#[test]
fn terminate_rung_stops_a_sleeper() {
    let mut process = start_sleeper(Options::default());

    let started = Instant::now();
    let status = process
        .stop(StopActions {
            first: Stop::Terminate(Timeout::Finite(Duration::from_secs(5))),
            second: Stop::Kill(Timeout::Finite(Duration::from_secs(5))),
            third: Stop::Noop,
        })
        .expect("stop");

    assert_eq!(status, EXIT_SIGTERM);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(process.status(), Status::Exited(EXIT_SIGTERM));
}

#[test]
fn ladder_escalates_to_kill() {
    // A child that shrugs off SIGTERM forces the second rung.
    let mut process = Process::new();
    process
        .start(
            &["sh", "-c", "trap '' TERM; sleep 30"],
            Options::default(),
        )
        .expect("start");

    // Give the shell a moment to install the trap.
    std::thread::sleep(Duration::from_millis(100));

    let status = process
        .stop(StopActions {
            first: Stop::Terminate(Timeout::Finite(Duration::from_millis(300))),
            second: Stop::Kill(Timeout::Finite(Duration::from_secs(5))),
            third: Stop::Noop,
        })
        .expect("stop");

    assert_eq!(status, EXIT_SIGKILL);
}

#[test]
fn wait_rung_returns_natural_exits() {
    let mut process = Process::new();
    process
        .start(&["sh", "-c", "exit 7"], Options::default())
        .expect("start");

    let status = process
        .stop(StopActions {
            first: Stop::Wait(Timeout::Finite(Duration::from_secs(5))),
            second: Stop::Terminate(Timeout::Infinite),
            third: Stop::Noop,
        })
        .expect("stop");

    assert_eq!(status, 7);
}

#[test]
fn stop_after_exit_returns_the_cached_status() {
    let mut process = Process::new();
    process
        .start(&["sh", "-c", "exit 3"], Options::default())
        .expect("start");
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), 3);

    // No signal reaches the OS here: the pid may already be recycled.
    let status = process
        .stop(StopActions {
            first: Stop::Kill(Timeout::Infinite),
            second: Stop::Noop,
            third: Stop::Noop,
        })
        .expect("stop");
    assert_eq!(status, 3);
}

#[test]
fn wait_zero_polls_without_reaping() {
    let mut process = start_sleeper(Options::default());

    assert_eq!(
        process.wait(Timeout::Finite(Duration::ZERO)),
        Err(Error::TimedOut)
    );
    assert_eq!(process.status(), Status::Running);

    process.kill().expect("kill");
    assert_eq!(process.wait(Timeout::Infinite).expect("wait"), EXIT_SIGKILL);
}

#[test]
fn deadline_rung_uses_remaining_deadline() {
    let options = Options {
        deadline: Some(Duration::from_millis(200)),
        ..Options::default()
    };
    let mut process = start_sleeper(options);

    let started = Instant::now();
    let status = process
        .stop(StopActions {
            first: Stop::Wait(Timeout::Deadline),
            second: Stop::Terminate(Timeout::Infinite),
            third: Stop::Noop,
        })
        .expect("stop");

    // The wait rung burns at most the 200 ms deadline before the
    // terminate rung ends the child.
    assert_eq!(status, EXIT_SIGTERM);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn drop_replays_the_stop_plan() {
    let options = Options {
        stop: StopActions {
            first: Stop::Terminate(Timeout::Finite(Duration::from_secs(5))),
            second: Stop::Kill(Timeout::Finite(Duration::from_secs(5))),
            third: Stop::Noop,
        },
        ..Options::default()
    };

    let process = start_sleeper(options);
    let pid = process.pid().expect("pid") as i32;

    drop(process);

    // The drop ran the ladder to completion and reaped the child, so the
    // pid no longer exists (barring recycling).
    let r = unsafe { libc::kill(pid, 0) };
    assert!(r < 0);
    assert_eq!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    );
}

#[test]
fn default_stop_plan_bounds_drop_by_the_deadline() {
    let options = Options {
        deadline: Some(Duration::from_millis(100)),
        ..Options::default()
    };
    let process = start_sleeper(options);

    let started = Instant::now();
    drop(process);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn terminate_and_kill_are_noops_after_reap() {
    let mut process = Process::new();
    process.start(&["true"], Options::default()).expect("start");
    process.wait(Timeout::Infinite).expect("wait");

    process.terminate().expect("terminate after exit");
    process.kill().expect("kill after exit");
}
