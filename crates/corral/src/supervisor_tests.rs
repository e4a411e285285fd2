//! Tests for the process-set supervisor.

#![allow(clippy::expect_used)]

use std::thread;
use std::time::{Duration, Instant};

use crate::process::{LaunchCommand, ProcessHandle, ProcessState};
use crate::shutdown::ShutdownFlag;
use crate::supervisor::Supervisor;

fn spawn_sleep(name: &str, seconds: &str) -> ProcessHandle {
    let command = LaunchCommand::new(name, vec!["sleep".to_owned(), seconds.to_owned()]);
    ProcessHandle::spawn(&command).expect("spawn sleep")
}

fn fast_supervisor(handles: Vec<ProcessHandle>, shutdown: ShutdownFlag) -> Supervisor {
    Supervisor::new(handles, shutdown)
        .with_timing(Duration::from_millis(20), Duration::from_secs(5))
}

#[test]
fn run_returns_once_all_handles_are_terminal() {
    let shutdown = ShutdownFlag::new();
    let handles = vec![spawn_sleep("a", "0.1"), spawn_sleep("b", "30")];
    let reports = fast_supervisor(handles, shutdown).run().expect("run");
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.state.is_terminal()));
}

#[test]
fn first_exit_fans_out_to_the_sibling() {
    let shutdown = ShutdownFlag::new();
    let handles = vec![spawn_sleep("short", "0.1"), spawn_sleep("long", "30")];
    let started = Instant::now();
    let reports = fast_supervisor(handles, shutdown).run().expect("run");
    // The 30s sleeper must have been stopped well before its own exit.
    assert!(started.elapsed() < Duration::from_secs(5));
    let long = reports
        .iter()
        .find(|report| report.name == "long")
        .expect("long report");
    assert!(long.state.is_terminal());
    assert_ne!(long.state, ProcessState::Exited { code: Some(0) });
}

#[test]
fn preset_shutdown_flag_stops_immediately() {
    let shutdown = ShutdownFlag::new();
    shutdown.set();
    let handles = vec![spawn_sleep("a", "30")];
    let started = Instant::now();
    let reports = fast_supervisor(handles, shutdown).run().expect("run");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(reports[0].state.is_terminal());
}

#[test]
fn shutdown_flag_set_mid_run_ends_supervision() {
    let shutdown = ShutdownFlag::new();
    let handles = vec![spawn_sleep("a", "30"), spawn_sleep("b", "30")];
    let trigger = shutdown.clone();
    let setter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        trigger.set();
    });
    let started = Instant::now();
    let reports = fast_supervisor(handles, shutdown).run().expect("run");
    setter.join().expect("join setter");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.state.is_terminal()));
}

#[test]
fn stubborn_child_is_killed_after_the_grace_period() {
    let shutdown = ShutdownFlag::new();
    // A shell that traps SIGTERM keeps running until SIGKILL arrives.
    let command = LaunchCommand::new(
        "stubborn",
        vec![
            "sh".to_owned(),
            "-c".to_owned(),
            "trap '' TERM; sleep 30".to_owned(),
        ],
    );
    let handle = ProcessHandle::spawn(&command).expect("spawn stubborn");
    shutdown.set();
    let supervisor = Supervisor::new(vec![handle], shutdown)
        .with_timing(Duration::from_millis(20), Duration::from_millis(300));
    let started = Instant::now();
    let reports = supervisor.run().expect("run");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(reports[0].state, ProcessState::Killed);
}

#[test]
fn empty_process_set_returns_immediately() {
    let reports = Supervisor::new(Vec::new(), ShutdownFlag::new())
        .run()
        .expect("run");
    assert!(reports.is_empty());
}
