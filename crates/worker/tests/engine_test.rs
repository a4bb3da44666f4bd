use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::EngineConfig;
use builder_core::models::{Task, TaskType};
use builder_core::{BuilderError, BuilderResult, TaskQueue};
use builder_testing_utils::{wait_for, MockTaskQueue, TaskBuilder};
use builder_worker::{ProgressReporter, TaskEngine, TaskHandler, TaskStage};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// 按任务体的 `mode` 字段决定行为：`block` 等待放行，`panic` 直接 panic，`fail` 返回错误
#[derive(Default)]
struct ScriptedHandler {
    gate: CancellationToken,
    handled: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, task: Task, progress: ProgressReporter) -> BuilderResult<()> {
        progress.step("开始");
        match task.body["mode"].as_str().unwrap_or("ok") {
            "block" => self.gate.cancelled().await,
            "panic" => panic!("handler exploded"),
            "fail" => return Err(BuilderError::build_failed("编译失败")),
            _ => {}
        }
        self.handled.lock().await.push(task.task_id.clone());
        Ok(())
    }

    async fn on_failure(&self, task: &Task, error: &BuilderError) {
        self.failures
            .lock()
            .await
            .push((task.task_id.clone(), error.to_string()));
    }
}

fn task(task_type: TaskType, id: &str, mode: &str) -> Task {
    TaskBuilder::new(task_type)
        .with_id(id)
        .with_field("mode", serde_json::json!(mode))
        .build()
}

fn config(max_concurrent: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent,
        dequeue_timeout_seconds: 1,
        overload_backoff_seconds: 1,
        client_host: "test-host".to_string(),
        ..Default::default()
    }
}

/// 返回引擎和记录退回任务 id 的列表
fn engine_with_hook(
    max_concurrent: usize,
    handler: Arc<ScriptedHandler>,
) -> (TaskEngine, Arc<Mutex<Vec<String>>>) {
    let returned = Arc::new(Mutex::new(Vec::new()));
    let mut engine = TaskEngine::new(
        &config(max_concurrent),
        Arc::new(MockTaskQueue::new()),
        handler,
    );
    let sink = returned.clone();
    engine.set_return_task_hook(Arc::new(move |task: Task| {
        let sink = sink.clone();
        async move { sink.lock().await.push(task.task_id) }.boxed()
    }));
    (engine, returned)
}

#[tokio::test]
async fn test_overloaded_engine_returns_task() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, returned) = engine_with_hook(1, handler.clone());
    let engine_ref = &engine;

    engine
        .add_task(task(TaskType::BuildFromSourceCode, "t1", "block"))
        .await
        .unwrap();
    let err = engine
        .add_task(task(TaskType::BuildFromSourceCode, "t2", "block"))
        .await
        .unwrap_err();

    assert!(matches!(err, BuilderError::Overloaded));
    assert_eq!(*returned.lock().await, vec!["t2".to_string()]);
    assert_eq!(engine.current_inflight(), 1);
    assert_eq!(engine.stats().task_num, 1);
    assert_eq!(engine.stats().back_task_num, 1);

    handler.gate.cancel();
    assert!(wait_for(|| async move { engine_ref.live_tasks().await == 0 }, Duration::from_secs(2)).await);
    assert_eq!(engine.current_inflight(), 0);
}

#[tokio::test]
async fn test_uncontrolled_task_releases_slot() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, returned) = engine_with_hook(1, handler.clone());
    let engine_ref = &engine;
    let handler_ref = handler.as_ref();

    engine
        .add_task(task(TaskType::BuildFromImage, "img-1", "block"))
        .await
        .unwrap();
    assert!(wait_for(|| async move { engine_ref.current_inflight() == 0 }, Duration::from_secs(2)).await);

    engine
        .add_task(task(TaskType::BuildFromImage, "img-2", "block"))
        .await
        .unwrap();
    assert!(returned.lock().await.is_empty());
    assert_eq!(engine.live_tasks().await, 2);

    handler.gate.cancel();
    assert!(wait_for(|| async move { handler_ref.handled.lock().await.len() == 2 }, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_panic_is_reported_as_failure() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, _returned) = engine_with_hook(2, handler.clone());
    let engine_ref = &engine;
    let handler_ref = handler.as_ref();
    let mut events = engine.subscribe();

    engine
        .add_task(task(TaskType::ServiceCheck, "boom", "panic"))
        .await
        .unwrap();

    assert!(wait_for(|| async move { !handler_ref.failures.lock().await.is_empty() }, Duration::from_secs(2)).await);
    let failures = handler.failures.lock().await.clone();
    assert_eq!(failures[0].0, "boom");
    assert!(failures[0].1.contains("handler exploded"));
    assert!(wait_for(|| async move { engine_ref.stats().error_task_num == 1 }, Duration::from_secs(2)).await);
    assert_eq!(engine.current_inflight(), 0);

    let mut stages = Vec::new();
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        match event {
            Ok(event) => stages.push(event.stage),
            Err(_) => break,
        }
    }
    assert_eq!(stages.first(), Some(&TaskStage::Accepted));
    assert_eq!(stages.last(), Some(&TaskStage::Failed));
}

#[tokio::test]
async fn test_failed_task_calls_on_failure() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, _returned) = engine_with_hook(2, handler.clone());
    let handler_ref = handler.as_ref();

    engine
        .add_task(task(TaskType::ShareSlug, "f1", "fail"))
        .await
        .unwrap();
    assert!(wait_for(|| async move { handler_ref.failures.lock().await.len() == 1 }, Duration::from_secs(2)).await);
    assert_eq!(engine.stats().error_task_num, 1);
}

#[tokio::test]
async fn test_stop_returns_running_tasks() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, returned) = engine_with_hook(3, handler.clone());
    let handler_ref = handler.as_ref();

    engine
        .add_task(task(TaskType::BuildFromSourceCode, "s1", "block"))
        .await
        .unwrap();
    engine
        .add_task(task(TaskType::BuildFromImage, "i1", "block"))
        .await
        .unwrap();

    engine.stop().await.unwrap();
    let mut ids = returned.lock().await.clone();
    ids.sort();
    assert_eq!(ids, vec!["i1".to_string(), "s1".to_string()]);
    assert_eq!(engine.stats().back_task_num, 2);

    // 退回后任务结束不再计入结果
    handler.gate.cancel();
    assert!(wait_for(|| async move { handler_ref.handled.lock().await.len() == 2 }, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.stats().error_task_num, 0);
    assert!(handler.failures.lock().await.is_empty());
}

#[tokio::test]
async fn test_unknown_task_type_counts_as_error() {
    let handler = Arc::new(ScriptedHandler::default());
    let (engine, returned) = engine_with_hook(1, handler);

    let err = engine
        .add_task(TaskBuilder::raw("rebuild-world").build())
        .await
        .unwrap_err();
    assert!(matches!(err, BuilderError::UnknownTaskType(_)));
    assert_eq!(engine.stats().error_task_num, 1);
    assert_eq!(engine.stats().task_num, 0);
    assert!(returned.lock().await.is_empty());
}

#[tokio::test]
async fn test_dequeue_loop_consumes_topic() {
    let handler = Arc::new(ScriptedHandler::default());
    let queue = Arc::new(MockTaskQueue::new());
    let engine = Arc::new(TaskEngine::new(&config(4), queue.clone(), handler.clone()));
    let handler_ref = handler.as_ref();

    engine.start().await.unwrap();
    queue
        .enqueue("builder", &task(TaskType::BuildFromImage, "q1", "ok"))
        .await
        .unwrap();
    queue
        .enqueue("builder", &task(TaskType::ShareImage, "q2", "ok"))
        .await
        .unwrap();

    assert!(wait_for(|| async move { handler_ref.handled.lock().await.len() == 2 }, Duration::from_secs(3)).await);
    engine.stop().await.unwrap();
    assert_eq!(engine.stats().task_num, 2);
    assert_eq!(queue.pending("builder"), 0);
}

#[tokio::test]
async fn test_closed_queue_finishes_engine() {
    let handler = Arc::new(ScriptedHandler::default());
    let queue = Arc::new(MockTaskQueue::new());
    let engine = Arc::new(TaskEngine::new(&config(1), queue.clone(), handler));

    engine.start().await.unwrap();
    queue.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(3), engine.finished())
        .await
        .unwrap();
    engine.stop().await.unwrap();
}
