//! Worker HTTP contract, exercised over real sockets.

mod common;

use std::time::Duration;

use serde_json::{Value, json};

use common::{Reply, StubLlm, last_tool_result, spawn_worker, user_turns, wait_terminal};
use taskhive::protocol::{HealthResponse, TaskResultResponse, WorkerStatusResponse};
use taskhive::task::TaskStatus;

fn rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Dispatched => 1,
        TaskStatus::Running => 2,
        _ => 3,
    }
}

async fn submit(http: &reqwest::Client, url: &str, body: Value) -> reqwest::Response {
    http.post(format!("{url}/task")).json(&body).send().await.unwrap()
}

#[tokio::test]
async fn concurrent_dispatches_admit_one_and_409_the_rest() {
    let worker = spawn_worker(
        "w1",
        StubLlm::text("done").with_delay(Duration::from_millis(500)),
    )
    .await;
    let http = reqwest::Client::new();

    let attempts = (0..6).map(|i| {
        let http = http.clone();
        let url = worker.url.clone();
        async move {
            submit(&http, &url, json!({"task_id": format!("t{i}"), "description": "go"}))
                .await
                .status()
                .as_u16()
        }
    });
    let codes = futures::future::join_all(attempts).await;
    assert_eq!(codes.iter().filter(|c| **c == 202).count(), 1);
    assert_eq!(codes.iter().filter(|c| **c == 409).count(), 5);

    let busy = submit(&http, &worker.url, json!({"task_id": "late", "description": "go"})).await;
    assert_eq!(busy.status().as_u16(), 409);
    let body: Value = busy.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "busy");
}

#[tokio::test]
async fn observed_status_never_moves_backward() {
    let worker = spawn_worker(
        "w1",
        StubLlm::text("done").with_delay(Duration::from_millis(300)),
    )
    .await;
    let http = reqwest::Client::new();
    submit(&http, &worker.url, json!({"task_id": "t1", "description": "go"})).await;

    let mut last = 0;
    let mut seen_running = false;
    loop {
        let body: TaskResultResponse = http
            .get(format!("{}/task/t1/result", worker.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(rank(body.status) >= last, "status moved backward to {}", body.status);
        last = rank(body.status);
        if body.status == TaskStatus::Running {
            seen_running = true;
            assert!(body.result.is_none());
        }
        if body.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen_running);
}

#[tokio::test]
async fn result_is_idempotent_after_completion() {
    let worker = spawn_worker("w1", StubLlm::text("forty-two")).await;
    let http = reqwest::Client::new();
    submit(&http, &worker.url, json!({"task_id": "t1", "description": "answer"})).await;

    let first = wait_terminal(&http, &worker.url, "t1").await;
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(first.result.as_deref(), Some("forty-two"));
    assert!(first.started_at.is_some() && first.completed_at.is_some());

    for _ in 0..3 {
        let again: TaskResultResponse = http
            .get(format!("{}/task/t1/result", worker.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(again, first);
    }

    // Re-dispatching a known task is acknowledged without a rerun.
    let dup = submit(&http, &worker.url, json!({"task_id": "t1", "description": "answer"})).await;
    assert_eq!(dup.status().as_u16(), 202);
}

#[tokio::test]
async fn consecutive_tasks_do_not_share_memory() {
    // The stub repeats back every user turn it has been shown.
    let worker = spawn_worker(
        "w1",
        StubLlm::new(|messages| Reply::Text(format!("You said: {}", user_turns(messages)))),
    )
    .await;
    let http = reqwest::Client::new();

    submit(&http, &worker.url, json!({"task_id": "a", "description": "remember secret123"})).await;
    let a = wait_terminal(&http, &worker.url, "a").await;
    assert!(a.result.unwrap().contains("secret123"));

    submit(&http, &worker.url, json!({"task_id": "b", "description": "what did I say?"})).await;
    let b = wait_terminal(&http, &worker.url, "b").await;
    let answer = b.result.unwrap();
    assert!(answer.contains("what did I say?"));
    assert!(!answer.contains("secret123"));

    // Nothing is left in the scratch root.
    assert_eq!(std::fs::read_dir(worker.scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn validation_error_is_fed_back_and_the_loop_continues() {
    let worker = spawn_worker(
        "w1",
        StubLlm::new(|messages| match last_tool_result(messages) {
            None => Reply::Call("file_write", json!({"path": "notes.txt"})),
            Some(result) if result.contains("validation_error") => {
                Reply::Call("file_write", json!({"path": "notes.txt", "content": "hi"}))
            }
            Some(_) => Reply::Text("saved after retry".to_string()),
        }),
    )
    .await;
    let http = reqwest::Client::new();
    submit(
        &http,
        &worker.url,
        json!({"task_id": "t1", "description": "save a note", "skills": ["file_ops"]}),
    )
    .await;

    let result = wait_terminal(&http, &worker.url, "t1").await;
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result.as_deref(), Some("saved after retry"));

    let events: Vec<Value> = http
        .get(format!("{}/task/t1/events", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let finished: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "tool_call_finished")
        .collect();
    assert_eq!(finished.len(), 2);
    assert_eq!(finished[0]["success"], false);
    assert_eq!(finished[0]["error_kind"], "validation_error");
    assert_eq!(finished[1]["success"], true);
}

#[tokio::test]
async fn health_and_status_track_the_active_task() {
    let worker = spawn_worker(
        "w-health",
        StubLlm::text("ok").with_delay(Duration::from_millis(300)),
    )
    .await;
    let http = reqwest::Client::new();

    let idle: HealthResponse = http
        .get(format!("{}/health", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(idle.status, "healthy");
    assert_eq!(idle.worker_id, "w-health");
    assert!(idle.current_task.is_none());

    submit(&http, &worker.url, json!({"task_id": "t1", "description": "go"})).await;
    let busy: WorkerStatusResponse = http
        .get(format!("{}/status", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(busy.current_task.as_deref(), Some("t1"));
    assert_eq!(busy.total_tasks, 1);
    assert!(busy.skills.contains(&"web_fetch".to_string()));

    wait_terminal(&http, &worker.url, "t1").await;
    let after: HealthResponse = http
        .get(format!("{}/health", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(after.current_task.is_none());
}

#[tokio::test]
async fn cancel_is_cooperative_and_advisory() {
    let worker = spawn_worker(
        "w1",
        StubLlm::new(|_| Reply::Call("file_read", json!({"path": "missing.txt"})))
            .with_delay(Duration::from_millis(50)),
    )
    .await;
    let http = reqwest::Client::new();
    submit(
        &http,
        &worker.url,
        json!({"task_id": "t1", "description": "loop", "skills": ["file_ops"]}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let resp: Value = http
        .post(format!("{}/task/t1/cancel", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["success"], true);

    let result = wait_terminal(&http, &worker.url, "t1").await;
    assert_eq!(result.status, TaskStatus::Cancelled);

    let late: Value = http
        .post(format!("{}/task/t1/cancel", worker.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(late["success"], false);
    assert_eq!(late["status"], "cancelled");

    let unknown = http
        .post(format!("{}/task/nope/cancel", worker.url))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 404);
}

#[tokio::test]
async fn task_ids_outside_the_path_alphabet_are_rejected() {
    let worker = spawn_worker("w1", StubLlm::text("done")).await;
    let http = reqwest::Client::new();

    for id in ["obj-fetch/a", "a?b", "a#b"] {
        let resp = submit(&http, &worker.url, json!({"task_id": id, "description": "go"})).await;
        assert_eq!(resp.status().as_u16(), 400, "{id} was accepted");
    }
    assert_eq!(worker.executor.status().await.total_tasks, 0);
    assert!(worker.executor.current_task().await.is_none());
}
