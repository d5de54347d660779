#![cfg(unix)]

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use mediaflow::actions::offload::JobRunner;
use mediaflow::actions::process::{parse_progress, CommandFactory, CommandJob};
use mediaflow::runtime::error::TaskError;
use mediaflow::runtime::runner::RunnerFactory;
use mediaflow::runtime::task::{Task, TaskStatus};
use mediaflow::trigger::Asset;
use serde_json::json;
use tokio::task::LocalSet;
use common::settled;

fn shell(script: &str) -> Task {
    Task::new("shell", JobRunner::new(CommandJob {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        cwd: None,
    }))
}

#[test]
fn test_parse_progress() {
    assert_eq!(parse_progress("progress=0.5"), Some(0.5));
    assert_eq!(parse_progress("  progress= 1 "), Some(1.0));
    assert_eq!(parse_progress("progress=1.5"), None);
    assert_eq!(parse_progress("progress=abc"), None);
    assert_eq!(parse_progress("frame=42"), None);
}

#[test]
fn test_factory_validates_params() {
    let factory = CommandFactory;
    assert!(factory.validate(&json!({})).is_err());
    assert!(factory.validate(&json!({"program": "ls", "args": "-l"})).is_err());
    assert!(factory.validate(&json!({"program": "ls", "args": ["-l", 2]})).is_ok());
    assert!(factory.create(&Asset::default(), &json!({"program": "ls"})).is_ok());
}

#[tokio::test]
async fn test_command_reports_progress_lines() {
    LocalSet::new()
        .run_until(async {
            let task = shell("echo progress=0.5; echo converting; echo progress=1");
            let seen = Rc::new(RefCell::new(Vec::new()));
            let s = seen.clone();
            task.add_observer(move |t| s.borrow_mut().push(t.completion()));

            task.start().unwrap();
            let result = settled(&task).await.unwrap();

            assert_eq!(result, json!({"exit_code": 0}));
            assert_eq!(task.status_text(), "converting");
            assert!(seen.borrow().contains(&Some(0.5)));
        })
        .await;
}

#[tokio::test]
async fn test_command_failure_carries_stderr() {
    LocalSet::new()
        .run_until(async {
            let task = shell("echo 'unknown codec' >&2; exit 3");
            task.start().unwrap();

            let err = settled(&task).await.unwrap_err();
            assert!(err.to_string().contains("unknown codec"), "{}", err);
            assert_eq!(task.status(), TaskStatus::Failed);
        })
        .await;
}

#[tokio::test]
async fn test_missing_program_fails() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("missing", JobRunner::new(CommandJob {
                program: "/nonexistent/mediaflow-tool".to_string(),
                args: Vec::new(),
                cwd: None,
            }));
            task.start().unwrap();
            let err = settled(&task).await.unwrap_err();
            assert!(err.to_string().contains("Failed to spawn"), "{}", err);
        })
        .await;
}

#[tokio::test]
async fn test_cancel_kills_process() {
    LocalSet::new()
        .run_until(async {
            let task = shell("sleep 30");
            task.start().unwrap();
            tokio::task::yield_now().await;

            task.cancel().unwrap();
            let started = std::time::Instant::now();
            let err = settled(&task).await.unwrap_err();
            assert!(matches!(err, TaskError::Cancelled));
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
        })
        .await;
}
