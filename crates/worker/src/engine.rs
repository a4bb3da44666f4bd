//! 任务执行引擎
//!
//! 从消息队列的主题中持续取出任务，在全局并发上限内为每个任务启动独立的 tokio 任务。
//! 受并发控制的任务（源码构建、服务检测、插件 Dockerfile 构建）在整个执行期间占用槽位，
//! 其余任务启动后立即释放槽位。槽位已满时任务交给退回钩子，由钩子重新投递到队列。

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::EngineConfig;
use builder_core::models::{Task, TaskType};
use builder_core::{BuilderError, BuilderResult, TaskQueue};
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::progress::{ProgressEvent, ProgressReporter, TaskStage};

/// 接收引擎当前无法执行的任务
pub type ReturnTaskHook = Arc<dyn Fn(Task) -> BoxFuture<'static, ()> + Send + Sync>;

/// 按任务类型执行任务
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task, progress: ProgressReporter) -> BuilderResult<()>;

    /// 任务返回错误或发生 panic 后调用，负责把对应记录标记为失败
    async fn on_failure(&self, task: &Task, error: &BuilderError);
}

/// 引擎计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub task_num: u64,
    pub error_task_num: u64,
    pub back_task_num: u64,
}

#[derive(Default)]
struct Counters {
    task_num: AtomicU64,
    error_task_num: AtomicU64,
    back_task_num: AtomicU64,
}

impl Counters {
    fn task(&self) {
        self.task_num.fetch_add(1, Ordering::Relaxed);
        counter!("builder_task_total").increment(1);
    }

    fn error(&self) {
        self.error_task_num.fetch_add(1, Ordering::Relaxed);
        counter!("builder_task_error_total").increment(1);
    }

    fn back(&self) {
        self.back_task_num.fetch_add(1, Ordering::Relaxed);
        counter!("builder_task_back_total").increment(1);
    }
}

/// 执行中的任务共享的状态
struct Shared {
    handler: Arc<dyn TaskHandler>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    live: RwLock<HashMap<String, Task>>,
    counters: Counters,
    progress: broadcast::Sender<ProgressEvent>,
}

impl Shared {
    fn inflight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    fn publish_inflight(&self) {
        gauge!("builder_task_inflight").set(self.inflight() as f64);
    }

    fn emit(&self, task: &Task, stage: TaskStage, detail: impl Into<String>) {
        ProgressReporter::new(task, self.progress.clone()).report(stage, detail);
    }
}

pub struct TaskEngine {
    shared: Arc<Shared>,
    queue: Arc<dyn TaskQueue>,
    config: EngineConfig,
    client_host: String,
    return_hook: ReturnTaskHook,
    cancel: CancellationToken,
    /// 出队循环结束（正常停止或连接失败）时触发
    finished: CancellationToken,
    dequeue_handle: Mutex<Option<JoinHandle<BuilderResult<()>>>>,
}

impl TaskEngine {
    pub fn new(
        config: &EngineConfig,
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let (progress, _) = broadcast::channel(256);
        let client_host = if config.client_host.is_empty() {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "builder".to_string())
        } else {
            config.client_host.clone()
        };

        Self {
            shared: Arc::new(Shared {
                handler,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                max_concurrent: config.max_concurrent,
                live: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                progress,
            }),
            return_hook: requeue_hook(queue.clone(), config.topic.clone()),
            queue,
            config: config.clone(),
            client_host,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            dequeue_handle: Mutex::new(None),
        }
    }

    /// 替换默认的退回钩子（默认重新投递到消费的主题）
    pub fn set_return_task_hook(&mut self, hook: ReturnTaskHook) {
        self.return_hook = hook;
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// 当前占用的槽位数
    pub fn current_inflight(&self) -> usize {
        self.shared.inflight()
    }

    /// 尚未结束的任务数，包含已释放槽位的任务
    pub async fn live_tasks(&self) -> usize {
        self.shared.live.read().await.len()
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.shared.counters;
        EngineStats {
            task_num: counters.task_num.load(Ordering::Relaxed),
            error_task_num: counters.error_task_num.load(Ordering::Relaxed),
            back_task_num: counters.back_task_num.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.progress.subscribe()
    }

    /// 出队循环结束后返回
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    /// 接收并启动任务
    ///
    /// 没有空闲槽位时先调用退回钩子，再返回 `Overloaded`。
    #[instrument(skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    pub async fn add_task(&self, task: Task) -> BuilderResult<()> {
        let task_type = match task.kind() {
            Ok(task_type) => task_type,
            Err(e) => {
                self.shared.counters.error();
                warn!(error = %e, "丢弃无法识别的任务");
                return Err(e);
            }
        };

        let permit = match self.shared.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(
                    max_concurrent = self.shared.max_concurrent,
                    "任务引擎已满载，退回任务"
                );
                self.shared.counters.back();
                (self.return_hook)(task).await;
                return Err(BuilderError::Overloaded);
            }
        };

        self.shared.counters.task();
        self.shared
            .live
            .write()
            .await
            .insert(task.task_id.clone(), task.clone());
        self.shared.publish_inflight();
        self.shared.emit(&task, TaskStage::Accepted, "");

        tokio::spawn(run_task(self.shared.clone(), task, task_type, permit));
        Ok(())
    }

    /// 启动出队循环
    pub async fn start(self: &Arc<Self>) -> BuilderResult<()> {
        let mut handle = self.dequeue_handle.lock().await;
        if handle.is_some() {
            return Err(BuilderError::internal("任务引擎已经启动"));
        }
        info!(
            topic = %self.config.topic,
            max_concurrent = self.shared.max_concurrent,
            client_host = %self.client_host,
            "任务引擎启动"
        );
        let engine = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            let result = engine.dequeue_loop().await;
            engine.finished.cancel();
            result
        }));
        Ok(())
    }

    /// 停止出队，并把仍在执行的任务交给退回钩子
    ///
    /// 执行中的任务不会被等待，由其他节点重新处理。返回出队循环的结果。
    pub async fn stop(&self) -> BuilderResult<()> {
        info!("任务引擎停止中");
        self.cancel.cancel();

        let loop_result = match self.dequeue_handle.lock().await.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(BuilderError::internal(format!("出队循环异常退出: {e}"))),
            },
            None => Ok(()),
        };
        self.finished.cancel();

        let returned: Vec<Task> = self.shared.live.write().await.drain().map(|(_, t)| t).collect();
        for task in returned {
            info!(task_id = %task.task_id, task_type = %task.task_type, "退回执行中的任务");
            self.shared.counters.back();
            self.shared.emit(&task, TaskStage::Returned, "");
            (self.return_hook)(task).await;
        }

        info!(stats = ?self.stats(), "任务引擎已停止");
        loop_result
    }

    async fn dequeue_loop(&self) -> BuilderResult<()> {
        let topic = self.config.topic.as_str();
        let backoff = self.config.overload_backoff();

        loop {
            while self.current_inflight() >= self.max_concurrent() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let dequeued = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                result = self.queue.dequeue(topic, &self.client_host, self.config.dequeue_timeout()) => result,
            };

            match dequeued {
                Ok(task) => match self.add_task(task).await {
                    Ok(()) | Err(BuilderError::Overloaded) => {}
                    Err(e) => debug!(error = %e, "任务未被接收"),
                },
                Err(BuilderError::DeadlineExceeded) => continue,
                Err(BuilderError::Cancelled) => {
                    info!("消息队列已关闭，停止出队");
                    return Ok(());
                }
                Err(BuilderError::NoConnection) => {
                    error!("消息队列连接不可用，出队循环退出");
                    return Err(BuilderError::NoConnection);
                }
                Err(e) => {
                    warn!(error = %e, "出队失败");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

/// 把任务重新投递到指定主题
pub fn requeue_hook(queue: Arc<dyn TaskQueue>, topic: String) -> ReturnTaskHook {
    Arc::new(move |task: Task| {
        let queue = queue.clone();
        let topic = topic.clone();
        Box::pin(async move {
            if let Err(e) = queue.enqueue(&topic, &task).await {
                error!(task_id = %task.task_id, topic = %topic, error = %e, "退回任务失败");
            }
        })
    })
}

async fn run_task(
    shared: Arc<Shared>,
    task: Task,
    task_type: TaskType,
    permit: OwnedSemaphorePermit,
) {
    let permit = if task_type.is_concurrency_controlled() {
        Some(permit)
    } else {
        drop(permit);
        shared.publish_inflight();
        None
    };

    let reporter = ProgressReporter::new(&task, shared.progress.clone());
    reporter.report(TaskStage::Running, "");

    let started = std::time::Instant::now();
    let handler = shared.handler.clone();
    let worker_task = task.clone();
    let outcome = match tokio::spawn(async move { handler.handle(worker_task, reporter).await })
        .await
    {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(task_id = %task.task_id, panic = %message, "任务执行发生 panic");
            Err(BuilderError::internal(format!("任务执行异常: {message}")))
        }
        Err(e) => Err(BuilderError::internal(format!("任务被中止: {e}"))),
    };

    drop(permit);
    shared.publish_inflight();

    // 引擎停止时已退回的任务不再记录结果
    if shared.live.write().await.remove(&task.task_id).is_none() {
        debug!(task_id = %task.task_id, "任务已退回，忽略执行结果");
        return;
    }

    match outcome {
        Ok(()) => {
            info!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                elapsed = ?started.elapsed(),
                "任务执行完成"
            );
            shared.emit(&task, TaskStage::Succeeded, "");
        }
        Err(e) => {
            shared.counters.error();
            error!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                error = %e,
                "任务执行失败"
            );
            shared.handler.on_failure(&task, &e).await;
            shared.emit(&task, TaskStage::Failed, e.user_message());
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
