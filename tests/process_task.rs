#![cfg(unix)]

mod common;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::wait_for_in_use;
use vision_scheduler::errors::SchedulerError;
use vision_scheduler::services::{ProcessCommand, ProcessExit, ProcessTask, SlotClass, SlotPool};

fn sleep_command(secs: &str) -> ProcessCommand {
    ProcessCommand::new("sleep")
        .arg(secs)
        .stop_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_stop_releases_slot() {
    let pool = SlotPool::new(SlotClass::Record, 1);
    let scope = CancellationToken::new();

    let task = ProcessTask::spawn(&pool, &scope, "record:test", sleep_command("30"), None).unwrap();
    assert!(task.is_running());
    assert!(task.pid().is_some());
    assert_eq!(pool.in_use(), 1);

    let outcome = task.stop().await;
    assert_eq!(outcome, Some(ProcessExit::Killed));
    assert!(!task.is_running());
    assert!(task.slot_released());
    assert_eq!(pool.in_use(), 0);

    // Stopping again is harmless
    task.stop().await;
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn test_natural_exit_releases_slot() {
    let pool = SlotPool::new(SlotClass::Frame, 1);
    let scope = CancellationToken::new();

    let task = ProcessTask::spawn(&pool, &scope, "frame:ok", ProcessCommand::new("true"), None).unwrap();
    assert_eq!(task.wait().await, ProcessExit::Success);
    wait_for_in_use(&pool, 0).await;
    assert!(!task.is_running());

    let task = ProcessTask::spawn(&pool, &scope, "frame:fail", ProcessCommand::new("false"), None).unwrap();
    assert_eq!(task.wait().await, ProcessExit::Failed { code: Some(1) });
    wait_for_in_use(&pool, 0).await;
}

#[tokio::test]
async fn test_scope_cancellation_kills_and_releases() {
    let pool = SlotPool::new(SlotClass::Preview, 2);
    let parent = CancellationToken::new();

    let a = ProcessTask::spawn(&pool, &parent, "preview:a", sleep_command("30"), None).unwrap();
    let b = ProcessTask::spawn(&pool, &parent, "preview:b", sleep_command("30"), None).unwrap();
    assert_eq!(pool.in_use(), 2);

    parent.cancel();
    assert_eq!(a.wait().await, ProcessExit::Killed);
    assert_eq!(b.wait().await, ProcessExit::Killed);
    wait_for_in_use(&pool, 0).await;
    assert!(!a.is_running());
}

#[tokio::test]
async fn test_stop_racing_natural_exit_releases_once() {
    let pool = SlotPool::new(SlotClass::Frame, 2);
    let scope = CancellationToken::new();
    // Held for the whole test so a double release would show up as 0
    let _sentinel = pool.acquire(&scope).unwrap();

    for _ in 0..20 {
        let task = ProcessTask::spawn(&pool, &scope, "frame:race", sleep_command("0.01"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (stopped, waited) = tokio::join!(task.stop(), task.wait());
        assert!(stopped.is_some());
        assert!(matches!(waited, ProcessExit::Success | ProcessExit::Killed));
        wait_for_in_use(&pool, 1).await;
    }
    assert_eq!(pool.in_use(), 1);
}

#[tokio::test]
async fn test_launch_failure_releases_slot() {
    let pool = SlotPool::new(SlotClass::Frame, 1);
    let scope = CancellationToken::new();

    let result = ProcessTask::spawn(
        &pool,
        &scope,
        "frame:missing",
        ProcessCommand::new("/nonexistent/ffmpeg-binary"),
        None,
    );
    assert!(matches!(result, Err(SchedulerError::ProcessLaunchFailed { .. })));
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn test_spawn_fails_fast_when_pool_full() {
    let pool = SlotPool::new(SlotClass::Record, 1);
    let scope = CancellationToken::new();

    let running = ProcessTask::spawn(&pool, &scope, "record:1", sleep_command("30"), None).unwrap();
    let second = ProcessTask::spawn(&pool, &scope, "record:2", sleep_command("30"), None);
    assert!(matches!(
        second,
        Err(SchedulerError::SlotExhausted {
            class: SlotClass::Record,
            capacity: 1
        })
    ));

    running.stop().await;
    assert!(ProcessTask::spawn(&pool, &scope, "record:3", sleep_command("30"), None).is_ok());
    scope.cancel();
    wait_for_in_use(&pool, 0).await;
}

#[tokio::test]
async fn test_output_directory_is_created() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = dir.path().join("nested").join("stream");
    let pool = SlotPool::new(SlotClass::Record, 1);
    let scope = CancellationToken::new();

    let task = ProcessTask::spawn(&pool, &scope, "record:dir", ProcessCommand::new("true"), Some(&output)).unwrap();
    task.wait().await;
    assert!(output.is_dir());
}
