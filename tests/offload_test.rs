mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use mediaflow::actions::builtin::DelayJob;
use mediaflow::actions::offload::{job_fn, run_blocking, JobRunner};
use mediaflow::runtime::error::TaskError;
use mediaflow::runtime::task::{Task, TaskStatus};
use serde_json::json;
use tokio::task::LocalSet;
use common::settled;

#[tokio::test]
async fn test_job_reports_progress_and_result() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("job", job_fn(|ctx| async move {
                ctx.status("halfway");
                ctx.progress(0.5);
                Ok(json!({"frames": 12}))
            }));
            let seen = Rc::new(RefCell::new(Vec::new()));
            let s = seen.clone();
            task.add_observer(move |t| s.borrow_mut().push(t.completion()));

            task.start().unwrap();
            assert_eq!(task.status(), TaskStatus::Running);

            let outcome = settled(&task).await;
            assert_eq!(outcome.unwrap(), json!({"frames": 12}));
            assert_eq!(task.status_text(), "halfway");
            assert!(seen.borrow().contains(&Some(0.5)));
            assert_eq!(task.completion(), Some(1.0));
        })
        .await;
}

#[tokio::test]
async fn test_job_error_fails_task() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("job", job_fn(|_ctx| async move {
                Err::<serde_json::Value, _>(anyhow::anyhow!("codec not supported"))
            }));
            task.start().unwrap();

            let err = settled(&task).await.unwrap_err();
            assert_eq!(err.to_string(), "codec not supported");
            assert_eq!(task.status(), TaskStatus::Failed);
        })
        .await;
}

#[tokio::test]
async fn test_cancel_running_job() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("forever", job_fn(|_ctx| async move {
                std::future::pending::<()>().await;
                Ok(json!(null))
            }));
            task.start().unwrap();
            tokio::task::yield_now().await;

            task.cancel().unwrap();
            // Acknowledged asynchronously.
            assert_eq!(task.status(), TaskStatus::Running);

            let err = settled(&task).await.unwrap_err();
            assert!(matches!(err, TaskError::Cancelled));
        })
        .await;
}

#[test]
fn test_cancel_before_start() {
    let task = Task::new("never", job_fn(|_ctx| async move { Ok(json!(null)) }));
    task.cancel().unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().is_cancelled());
    assert!(matches!(task.start(), Err(TaskError::AlreadySettled(_))));
}

#[tokio::test]
async fn test_closure_jobs_cannot_pause() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("plain", job_fn(|_ctx| async move {
                std::future::pending::<()>().await;
                Ok(json!(null))
            }));
            task.start().unwrap();
            assert!(matches!(task.pause(), Err(TaskError::NotSupported { .. })));
            task.cancel().unwrap();
            let _ = settled(&task).await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_delay_job() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("delay", JobRunner::new(DelayJob {
                duration: Duration::from_secs(10),
                steps: 10,
            }));
            task.start().unwrap();

            tokio::time::sleep(Duration::from_millis(2500)).await;
            task.pause().unwrap();
            assert_eq!(task.status(), TaskStatus::Paused);

            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(task.status(), TaskStatus::Paused);
            let held = task.completion().unwrap();
            assert!(held < 1.0, "completion {} while paused", held);

            task.unpause().unwrap();
            let outcome = settled(&task).await.unwrap();
            assert_eq!(outcome, json!({"slept_ms": 10000}));
        })
        .await;
}

#[tokio::test]
async fn test_run_blocking_keeps_context() {
    LocalSet::new()
        .run_until(async {
            let task = Task::new("blocking", job_fn(|ctx| async move {
                run_blocking(&ctx, |ctx| {
                    ctx.progress(0.25);
                    ctx.status("hashing");
                    Ok(json!(42))
                })
                .await
            }));
            task.start().unwrap();
            assert_eq!(settled(&task).await.unwrap(), json!(42));
            assert_eq!(task.status_text(), "hashing");
        })
        .await;
}
