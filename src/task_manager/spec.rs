use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::task_manager::config::SchedulerConfig;
use crate::task_manager::context::TaskContext;
use crate::task_manager::handle::TaskParts;
use crate::task_manager::retry::RetryPolicy;
use crate::task_manager::types::{
    CompletionCallback, ProgressCallback, TaskFunction, TaskId, TaskKind, TaskOutcome,
    TaskPriority, TaskProgress, TaskResult,
};

/// Description of a unit of work handed to `TaskScheduler::submit`.
///
/// The body is called once per attempt, so arguments are captured by the closure and
/// cloned into each attempt's future.
///
/// ```rust,ignore
/// let spec = TaskSpec::new("import log_0412.csv", TaskKind::CsvImport, move |ctx| {
///     let path = path.clone();
///     async move {
///         ctx.report_progress(10, "parsing header", "parse");
///         import_csv(&path).await
///     }
/// })
/// .priority(TaskPriority::High)
/// .timeout(Duration::from_secs(30))
/// .retries(2);
/// ```
pub struct TaskSpec<T> {
    name: String,
    kind: TaskKind,
    priority: TaskPriority,
    timeout: Option<Duration>,
    retries: Option<u32>,
    retry_delay: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    function: TaskFunction<T>,
    on_complete: Option<CompletionCallback<T>>,
    on_progress: Option<ProgressCallback>,
}

impl<T> std::fmt::Debug for TaskSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("function", &"<function>")
            .finish()
    }
}

impl<T: Send + 'static> TaskSpec<T> {
    /// Async task body
    pub fn new<N, F, Fut>(name: N, kind: TaskKind, task_fn: F) -> Self
    where
        N: std::fmt::Display,
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let function: TaskFunction<T> = Arc::new(move |ctx| task_fn(ctx).boxed());
        Self::from_function(name, kind, function)
    }

    /// Synchronous task body, run on the blocking thread pool
    pub fn blocking<N, F>(name: N, kind: TaskKind, task_fn: F) -> Self
    where
        N: std::fmt::Display,
        F: Fn(TaskContext) -> TaskResult<T> + Send + Sync + 'static,
    {
        let task_fn = Arc::new(task_fn);
        let function: TaskFunction<T> = Arc::new(move |ctx| {
            let task_fn = task_fn.clone();
            async move {
                match tokio::task::spawn_blocking(move || task_fn(ctx)).await {
                    Ok(result) => result,
                    Err(join_error) => Err(join_error.into()),
                }
            }
            .boxed()
        });
        Self::from_function(name, kind, function)
    }

    pub fn from_function<N: std::fmt::Display>(
        name: N,
        kind: TaskKind,
        function: TaskFunction<T>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            priority: TaskPriority::default(),
            timeout: None,
            retries: None,
            retry_delay: None,
            retry_policy: None,
            function,
            on_complete: None,
            on_progress: None,
        }
    }
}

impl<T> TaskSpec<T> {
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Maximum wall time of a single attempt
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra attempts after the first failure
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Full retry policy; `retries` / `retry_delay` still override its fields
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(TaskId, &TaskOutcome<T>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(TaskId, &TaskProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn into_parts(self, defaults: &SchedulerConfig) -> TaskParts<T> {
        let mut retry_policy = self
            .retry_policy
            .unwrap_or_else(|| defaults.default_retry_policy.clone());
        if let Some(retries) = self.retries {
            retry_policy.retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            retry_policy.retry_delay = delay;
        }

        TaskParts {
            name: self.name,
            kind: self.kind,
            priority: self.priority,
            retry_policy,
            timeout: self.timeout.or(defaults.default_timeout),
            function: self.function,
            on_complete: self.on_complete,
            on_progress: self.on_progress,
        }
    }
}
