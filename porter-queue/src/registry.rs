//! Job handlers and their registry.

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Executes jobs of one type.
///
/// Handlers must be idempotent: a job whose worker dies mid-run is
/// claimed again once its lease expires.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, job: &Job) -> QueueResult<()>;
}

type BoxedFn =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> + Send + Sync>;

struct FnHandler(BoxedFn);

#[async_trait]
impl Handler for FnHandler {
    async fn handle(&self, job: &Job) -> QueueResult<()> {
        (self.0)(job.clone()).await
    }
}

/// Maps job types to handlers.
///
/// Built once before workers start, then shared read-only.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `job_type`.
    pub fn register<H>(&mut self, job_type: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.register_arc(job_type, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    /// Register an async closure.
    ///
    /// # Examples
    ///
    /// ```
    /// use porter_queue::*;
    ///
    /// let mut registry = HandlerRegistry::new();
    /// registry.register_fn("send_email", |job: Job| async move {
    ///     let to = job.payload["to"].as_str().unwrap_or_default().to_string();
    ///     if to.is_empty() {
    ///         return Err(QueueError::handler("missing recipient"));
    ///     }
    ///     Ok(())
    /// });
    /// assert!(registry.contains("send_email"));
    /// ```
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let wrapped: BoxedFn = Arc::new(
            move |job: Job| -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> {
                Box::pin(handler(job))
            },
        );
        self.register(job_type, FnHandler(wrapped))
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Fail with `UnknownJobType` naming every type in `required` that has
    /// no handler.
    pub fn ensure_registered(&self, required: &[&str]) -> QueueResult<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|job_type| !self.contains(job_type))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueueError::UnknownJobType(missing.join(", ")))
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(Arc<AtomicU32>);

    #[async_trait]
    impl Handler for Counting {
        async fn handle(&self, _job: &Job) -> QueueResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register("count", Counting(calls.clone()))
            .register_fn("fail", |_job| async { Err(QueueError::handler("nope")) });

        let job = Job::new("default", "count", serde_json::json!({}), Utc::now());
        registry.get("count").unwrap().handle(&job).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = registry.get("fail").unwrap().handle(&job).await.unwrap_err();
        assert!(matches!(err, QueueError::Handler(_)));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.job_types(), vec!["count", "fail"]);
    }

    #[test]
    fn test_ensure_registered() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("a", |_job| async { Ok(()) });

        assert!(registry.ensure_registered(&["a"]).is_ok());
        let err = registry.ensure_registered(&["a", "b", "c"]).unwrap_err();
        match err {
            QueueError::UnknownJobType(missing) => assert_eq!(missing, "b, c"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
