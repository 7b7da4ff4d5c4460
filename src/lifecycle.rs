//! Scoped acquisition of cluster resources.
//!
//! Every resource the orchestrator brings up is pushed onto a
//! [`CleanupStack`] as soon as it is ready. However the run ends (success,
//! error or panic), the stack is unwound last-in first-out and every cleanup
//! runs exactly once. A failing cleanup is logged and skipped so the next
//! one still runs and the caller sees the original failure.

use crate::errors::HarnessError;
use crate::ports::wait_until_free;
use crate::process::managed::describe_status;
use crate::process::{ManagedProcess, Signal};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a stopped service gets to exit on its own before SIGKILL.
const REAP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Starting,
    Ready,
    FailedToStart,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::NotStarted => "not started",
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::FailedToStart => "failed to start",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One state transition of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub resource: String,
    pub state: ServiceState,
    pub at: DateTime<Utc>,
}

/// Receives every transition a [`CleanupStack`] drives.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Observer that records events in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// `(resource, state)` pairs in the order they happened.
    pub fn transitions(&self) -> Vec<(String, ServiceState)> {
        self.events()
            .into_iter()
            .map(|event| (event.resource, event.state))
            .collect()
    }

    /// Resources in the order they reached `state`.
    pub fn reached(&self, state: ServiceState) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.state == state)
            .map(|event| event.resource)
            .collect()
    }
}

impl LifecycleObserver for EventLog {
    fn on_event(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), HarnessError>> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

struct Cleanup {
    resource: String,
    run: CleanupFn,
}

/// LIFO list of deferred cleanup actions.
pub struct CleanupStack {
    entries: Vec<Cleanup>,
    observer: Option<Arc<dyn LifecycleObserver>>,
}

impl Default for CleanupStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupStack {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            observer: None,
        }
    }

    pub fn with_observer(observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            entries: Vec::new(),
            observer: Some(observer),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn emit(&self, resource: &str, state: ServiceState) {
        tracing::debug!(resource, %state, "lifecycle transition");
        if let Some(observer) = &self.observer {
            observer.on_event(&LifecycleEvent {
                resource: resource.to_string(),
                state,
                at: Utc::now(),
            });
        }
    }

    /// Defer `cleanup` until the stack unwinds.
    pub fn push<F, Fut>(&mut self, resource: impl Into<String>, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.entries.push(Cleanup {
            resource: resource.into(),
            run: Box::new(move || Box::pin(cleanup())),
        });
    }

    /// Run `start`. On success the handle it produced is owned by the stack
    /// and passed to `stop` when the stack unwinds; the value is returned to
    /// the caller. On failure nothing is pushed.
    pub async fn acquire<H, T, Start, Stop, StopFut>(
        &mut self,
        resource: &str,
        start: Start,
        stop: Stop,
    ) -> Result<T, HarnessError>
    where
        Start: Future<Output = Result<(H, T), HarnessError>>,
        H: Send + 'static,
        Stop: FnOnce(H) -> StopFut + Send + 'static,
        StopFut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.emit(resource, ServiceState::Starting);
        match start.await {
            Ok((handle, value)) => {
                self.push(resource, move || stop(handle));
                self.emit(resource, ServiceState::Ready);
                tracing::info!(resource, "ready");
                Ok(value)
            }
            Err(err) => {
                self.emit(resource, ServiceState::FailedToStart);
                tracing::error!(resource, error = %err, "failed to start");
                Err(err)
            }
        }
    }

    /// Run every pending cleanup, most recent first. Failures are logged
    /// and returned but never stop the remaining cleanups.
    pub async fn unwind(&mut self) -> Vec<(String, HarnessError)> {
        let mut failures = Vec::new();
        while let Some(entry) = self.entries.pop() {
            self.emit(&entry.resource, ServiceState::Stopping);
            let outcome = AssertUnwindSafe((entry.run)()).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(resource = %entry.resource, error = %err, "cleanup failed");
                    failures.push((entry.resource.clone(), err));
                }
                Err(_) => {
                    tracing::warn!(resource = %entry.resource, "cleanup panicked");
                    failures.push((
                        entry.resource.clone(),
                        HarnessError::Other(anyhow::anyhow!("cleanup of {} panicked", entry.resource)),
                    ));
                }
            }
            self.emit(&entry.resource, ServiceState::Stopped);
        }
        failures
    }

    /// Unwind, then hand back the scope's outcome. A caught panic resumes
    /// once every cleanup has run.
    pub async fn close<T>(
        mut self,
        outcome: std::thread::Result<Result<T, HarnessError>>,
    ) -> Result<T, HarnessError> {
        self.unwind().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let pending: Vec<&str> = self.entries.iter().map(|e| e.resource.as_str()).collect();
            tracing::warn!(?pending, "cleanup stack dropped without unwinding");
        }
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending: Vec<&str> = self.entries.iter().map(|e| e.resource.as_str()).collect();
        f.debug_struct("CleanupStack")
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

/// Acquire one resource, run `body` with it, and release it on every exit
/// path before propagating the body's outcome.
pub async fn with_service<H, T, R, Start, Stop, StopFut, Body, BodyFut>(
    resource: &str,
    start: Start,
    stop: Stop,
    body: Body,
) -> Result<R, HarnessError>
where
    Start: Future<Output = Result<(H, T), HarnessError>>,
    H: Send + 'static,
    Stop: FnOnce(H) -> StopFut + Send + 'static,
    StopFut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    Body: FnOnce(T) -> BodyFut,
    BodyFut: Future<Output = Result<R, HarnessError>>,
{
    let mut stack = CleanupStack::new();
    let outcome = AssertUnwindSafe(async {
        let value = stack.acquire(resource, start, stop).await?;
        body(value).await
    })
    .catch_unwind()
    .await;
    stack.close(outcome).await
}

/// Stop contract for a managed service: interrupt it, wait until its port
/// can be bound again, then reap it (SIGKILL if it ignored the interrupt).
pub async fn stop_managed(
    mut process: ManagedProcess,
    policy: RetryPolicy,
) -> Result<(), HarnessError> {
    let service = process.service();
    let endpoint = process.endpoint().cloned();
    tracing::info!(%service, pid = process.pid(), "stopping");

    if process.try_exit_status().is_none() {
        if let Err(err) = process.terminate(Signal::Interrupt) {
            tracing::warn!(%service, error = %err, "failed to deliver SIGINT");
        }
    }

    let released = match &endpoint {
        Some(endpoint) => wait_until_free(service, &endpoint.host, endpoint.port, &policy).await,
        None => Ok(()),
    };
    let status = process.reap(REAP_GRACE).await;
    tracing::info!(%service, status = %describe_status(status), "stopped");

    match (released, endpoint) {
        // The interrupt was ignored and the reap escalated; check once more.
        (Err(_), Some(endpoint)) => {
            wait_until_free(service, &endpoint.host, endpoint.port, &policy).await
        }
        (released, _) => released,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localnet_common::{CommandSpec, ServiceKind};
    use std::os::unix::process::ExitStatusExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exploding_cleanup() -> Result<(), HarnessError> {
        panic!("cleanup bug")
    }

    fn counting_stop(
        counter: Arc<AtomicUsize>,
    ) -> impl FnOnce(()) -> futures::future::Ready<Result<(), HarnessError>> + Send + 'static {
        move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn unwind_runs_cleanups_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut stack = CleanupStack::new();
        for name in ["emulator", "database", "indexer"] {
            let log = log.clone();
            stack.push(name, move || async move {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            });
        }
        assert_eq!(stack.len(), 3);

        let failures = stack.unwind().await;
        assert!(failures.is_empty());
        assert!(stack.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["indexer", "database", "emulator"]);
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut stack = CleanupStack::new();
        let first = log.clone();
        stack.push("first", move || async move {
            first.lock().unwrap().push("first".to_string());
            Ok(())
        });
        stack.push("broken", || async {
            Err(HarnessError::Other(anyhow::anyhow!("port stuck")))
        });
        stack.push("panicky", || async { exploding_cleanup() });

        let failures = stack.unwind().await;
        let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["panicky", "broken"]);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn acquire_reports_transitions_to_the_observer() {
        let events = Arc::new(EventLog::new());
        let mut stack = CleanupStack::with_observer(events.clone());

        let port = stack
            .acquire(
                "emulator",
                async { Ok::<_, HarnessError>(((), 8082u16)) },
                |()| async { Ok(()) },
            )
            .await
            .unwrap();
        assert_eq!(port, 8082);

        let err = stack
            .acquire(
                "database",
                async { Err::<((), ()), _>(HarnessError::Config("boom".into())) },
                |()| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert_eq!(stack.len(), 1);

        stack.unwind().await;
        let expected = vec![
            ("emulator".to_string(), ServiceState::Starting),
            ("emulator".to_string(), ServiceState::Ready),
            ("database".to_string(), ServiceState::Starting),
            ("database".to_string(), ServiceState::FailedToStart),
            ("emulator".to_string(), ServiceState::Stopping),
            ("emulator".to_string(), ServiceState::Stopped),
        ];
        assert_eq!(events.transitions(), expected);
        assert_eq!(events.reached(ServiceState::Stopped), vec!["emulator"]);
    }

    #[tokio::test]
    async fn with_service_stops_once_after_success() {
        let stops = Arc::new(AtomicUsize::new(0));
        let result = with_service(
            "emulator",
            async { Ok::<_, HarnessError>(((), 21)) },
            counting_stop(stops.clone()),
            |value| async move { Ok::<_, HarnessError>(value * 2) },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_service_stops_once_when_body_fails() {
        let stops = Arc::new(AtomicUsize::new(0));
        let err = with_service(
            "database",
            async { Ok::<_, HarnessError>(((), ())) },
            counting_stop(stops.clone()),
            |()| async { Err::<(), _>(HarnessError::Body(anyhow::anyhow!("assertion failed"))) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("assertion failed"));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_service_stops_once_when_body_panics() {
        let stops = Arc::new(AtomicUsize::new(0));
        let outcome = AssertUnwindSafe(with_service(
            "indexer",
            async { Ok::<_, HarnessError>(((), ())) },
            counting_stop(stops.clone()),
            |()| async {
                let missing: Option<()> = None;
                missing.expect("test body panicked");
                Ok::<(), HarnessError>(())
            },
        ))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_start_never_runs_stop_or_body() {
        let stops = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(AtomicUsize::new(0));
        let ran = bodies.clone();
        let err = with_service(
            "app-server",
            async { Err::<((), ()), _>(HarnessError::Config("no binary".into())) },
            counting_stop(stops.clone()),
            move |()| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HarnessError>(())
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(bodies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_body_terminates_the_process() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = statuses.clone();
        let err = with_service(
            "query-node",
            async {
                let process = ManagedProcess::spawn(
                    ServiceKind::QueryNode,
                    &CommandSpec::new("sleep"),
                    &["30".to_string()],
                    None,
                )?;
                let pid = process.pid();
                Ok::<_, HarnessError>((process, pid))
            },
            move |mut process: ManagedProcess| async move {
                process.terminate(Signal::Interrupt).ok();
                let status = process.reap(Duration::from_secs(5)).await;
                seen.lock().unwrap().push(status);
                Ok(())
            },
            |_pid| async { Err::<(), _>(HarnessError::Body(anyhow::anyhow!("fault injected"))) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Body(_)));
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].and_then(|s| s.signal()), Some(libc::SIGINT));
    }

    #[tokio::test]
    async fn stop_managed_without_endpoint_reaps() {
        let process = ManagedProcess::spawn(
            ServiceKind::Database,
            &CommandSpec::new("sleep"),
            &["30".to_string()],
            None,
        )
        .unwrap();
        let pid = process.pid();
        stop_managed(process, RetryPolicy::DEFAULT).await.unwrap();
        assert!(!crate::process::safety_net::is_registered(pid));
    }
}
