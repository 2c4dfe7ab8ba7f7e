//! Resource lifecycle: serialized enable/disable/suspend/resume.
//!
//! Every named hardware resource (e.g. "GSM") has one [`ResourceLifecycle`].
//! Transition requests are queued and applied strictly one at a time by a
//! background task, which calls the owner's [`ResourceHooks`] and publishes
//! each status change.
//!
//! While a resource is not enabled its outward notifications go through a
//! [`SignalGate`]: queued ones are buffered and flushed in order once the
//! resource reaches [`ResourceStatus::Enabled`], checked ones are dropped.
//!
//! ```text
//!   Unknown ──Enable──▶ Enabling ──ok──▶ Enabled ──Suspend──▶ Suspending ──▶ Suspended
//!                          │ err            ▲                                   │
//!                          ▼                └──────── Resuming ◀──Resume────────┘
//!                      Disabling ──▶ Disabled
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};

/// Status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// Initial state, and the state after a failed disable.
    Unknown,
    /// The enable hook is running.
    Enabling,
    /// Usable. Operations pass `check_enabled` and signals are published.
    Enabled,
    /// The disable hook is running.
    Disabling,
    /// A disable completed.
    Disabled,
    /// The suspend hook is running.
    Suspending,
    /// Queued signals are deferred until the next resume.
    Suspended,
    /// The resume hook is running.
    Resuming,
}

impl ResourceStatus {
    /// Returns the lowercase name used in logs and signals.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Resuming => "resuming",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// To `Enabled` from `Unknown` or `Disabled`.
    Enable,
    /// Any state to `Disabled`.
    Disable,
    /// `Enabled` to `Suspended`.
    Suspend,
    /// `Suspended` to `Enabled`.
    Resume,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        })
    }
}

/// The hardware side of a resource.
///
/// Every hook defaults to an immediate success.
pub trait ResourceHooks: Send + 'static {
    fn enable(&mut self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn disable(&mut self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn suspend(&mut self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn resume(&mut self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ResourceHooks for NoHooks {}

struct Shared {
    status: ResourceStatus,
    deferred: VecDeque<Event>,
}

/// Status view and notification guard of one resource.
#[derive(Clone)]
pub struct SignalGate {
    name: String,
    shared: Arc<Mutex<Shared>>,
    events: EventDispatcher,
}

impl SignalGate {
    /// Creates the gate of a resource in [`ResourceStatus::Unknown`].
    ///
    /// Usually made by [`ResourceLifecycle::new`]; create it first when the
    /// hooks or handlers of the resource need it before the lifecycle exists.
    #[must_use]
    pub fn new(name: impl Into<String>, events: EventDispatcher) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Mutex::new(Shared {
                status: ResourceStatus::Unknown,
                deferred: VecDeque::new(),
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        self.lock().status
    }

    /// Returns true if the resource is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status() == ResourceStatus::Enabled
    }

    /// Fails with [`Error::ResourceNotEnabled`] unless the resource is enabled.
    pub fn check_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::ResourceNotEnabled {
                resource: self.name.clone(),
            })
        }
    }

    /// Publishes `event` now, or once the resource is enabled.
    pub fn emit_queued(&self, event: Event) {
        let mut shared = self.lock();
        if shared.status == ResourceStatus::Enabled {
            self.events.dispatch(event);
        } else {
            tracing::debug!("{}: deferring {:?} while {}", self.name, event, shared.status);
            shared.deferred.push_back(event);
        }
    }

    /// Publishes `event` if the resource is enabled, drops it otherwise.
    pub fn emit_checked(&self, event: Event) {
        let status = self.lock().status;
        if status == ResourceStatus::Enabled {
            self.events.dispatch(event);
        } else {
            tracing::warn!("{}: dropping {:?} while {}", self.name, event, status);
        }
    }

    fn set_status(&self, status: ResourceStatus) {
        // dispatch under the lock so flushed events stay ahead of new ones
        let mut shared = self.lock();
        if shared.status == status {
            return;
        }
        tracing::info!("{}: {} -> {}", self.name, shared.status, status);
        shared.status = status;

        self.events.dispatch(Event::ResourceStatus {
            resource: self.name.clone(),
            status,
        });

        if status == ResourceStatus::Enabled && !shared.deferred.is_empty() {
            tracing::debug!("{}: flushing {} deferred events", self.name, shared.deferred.len());
            for event in shared.deferred.drain(..) {
                self.events.dispatch(event);
            }
        }
    }
}

struct TransitionRequest {
    transition: Transition,
    reply: oneshot::Sender<Result<()>>,
}

/// Completion of a submitted transition.
#[must_use = "the transition result is discarded unless awaited"]
pub struct PendingTransition {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for PendingTransition {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::Cancelled)))
    }
}

/// A resource and the task that applies its transitions.
pub struct ResourceLifecycle {
    gate: SignalGate,
    tx: Option<mpsc::UnboundedSender<TransitionRequest>>,
    task: Option<JoinHandle<()>>,
}

impl ResourceLifecycle {
    /// Creates a resource in [`ResourceStatus::Unknown`].
    pub fn new<H>(name: impl Into<String>, hooks: H, events: EventDispatcher) -> Self
    where
        H: ResourceHooks,
    {
        Self::with_gate(SignalGate::new(name, events), hooks)
    }

    /// Creates a resource around an existing gate.
    pub fn with_gate<H>(gate: SignalGate, hooks: H) -> Self
    where
        H: ResourceHooks,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let task = LifecycleTask {
            gate: gate.clone(),
            hooks: Box::new(hooks),
        };
        let task = tokio::spawn(task.run(rx));

        Self {
            gate,
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.gate.name()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        self.gate.status()
    }

    /// Returns the notification gate.
    #[must_use]
    pub fn gate(&self) -> SignalGate {
        self.gate.clone()
    }

    /// Enables the resource. Succeeds at once if it already is.
    ///
    /// A failed enable is forced through a disable.
    pub fn enable(&self) -> PendingTransition {
        self.submit(Transition::Enable)
    }

    /// Disables the resource. A failing disable leaves it `Unknown`.
    pub fn disable(&self) -> PendingTransition {
        self.submit(Transition::Disable)
    }

    /// Suspends an enabled resource; returns to `Enabled` if the hook fails.
    ///
    /// A no-op outside `Enabled`.
    pub fn suspend(&self) -> PendingTransition {
        self.submit(Transition::Suspend)
    }

    /// Resumes a suspended resource and flushes deferred signals.
    ///
    /// A no-op outside `Suspended`; a failed resume is forced through a disable.
    pub fn resume(&self) -> PendingTransition {
        self.submit(Transition::Resume)
    }

    /// Queues a transition behind those already submitted.
    pub fn submit(&self, transition: Transition) -> PendingTransition {
        let (reply, rx) = oneshot::channel();
        tracing::debug!("{}: {} requested", self.gate.name, transition);
        if let Some(tx) = &self.tx {
            // on failure the reply is dropped and the caller sees Cancelled
            let _ = tx.send(TransitionRequest { transition, reply });
        }
        PendingTransition { rx }
    }

    /// Disables the resource (best effort) and stops its task.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.disable().await {
            tracing::warn!("{}: disable on shutdown failed: {}", self.gate.name, e);
        }
        self.tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ResourceLifecycle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct LifecycleTask {
    gate: SignalGate,
    hooks: Box<dyn ResourceHooks>,
}

impl LifecycleTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TransitionRequest>) {
        while let Some(request) = rx.recv().await {
            let result = self.apply(request.transition).await;
            let _ = request.reply.send(result);
        }
    }

    async fn apply(&mut self, transition: Transition) -> Result<()> {
        use ResourceStatus::{
            Disabled, Disabling, Enabled, Enabling, Resuming, Suspended, Suspending, Unknown,
        };

        let status = self.gate.status();
        match transition {
            Transition::Enable => {
                if status == Enabled {
                    return Ok(());
                }
                self.gate.set_status(Enabling);
                match self.hooks.enable().await {
                    Ok(()) => {
                        self.gate.set_status(Enabled);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("{}: enable failed: {}", self.gate.name, e);
                        self.force_disable().await;
                        Err(self.failed(transition, e))
                    }
                }
            }
            Transition::Disable => {
                if status == Disabled {
                    return Ok(());
                }
                self.gate.set_status(Disabling);
                match self.hooks.disable().await {
                    Ok(()) => {
                        self.gate.set_status(Disabled);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("{}: disable failed: {}", self.gate.name, e);
                        self.gate.set_status(Unknown);
                        Err(self.failed(transition, e))
                    }
                }
            }
            Transition::Suspend => {
                if status != Enabled {
                    tracing::debug!("{}: nothing to suspend while {}", self.gate.name, status);
                    return Ok(());
                }
                self.gate.set_status(Suspending);
                match self.hooks.suspend().await {
                    Ok(()) => {
                        self.gate.set_status(Suspended);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("{}: suspend failed: {}", self.gate.name, e);
                        self.gate.set_status(Enabled);
                        Err(self.failed(transition, e))
                    }
                }
            }
            Transition::Resume => {
                if status != Suspended {
                    tracing::debug!("{}: nothing to resume while {}", self.gate.name, status);
                    return Ok(());
                }
                self.gate.set_status(Resuming);
                match self.hooks.resume().await {
                    Ok(()) => {
                        self.gate.set_status(Enabled);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("{}: resume failed: {}", self.gate.name, e);
                        self.force_disable().await;
                        Err(self.failed(transition, e))
                    }
                }
            }
        }
    }

    async fn force_disable(&mut self) {
        self.gate.set_status(ResourceStatus::Disabling);
        match self.hooks.disable().await {
            Ok(()) => self.gate.set_status(ResourceStatus::Disabled),
            Err(e) => {
                tracing::error!("{}: forced disable failed: {}", self.gate.name, e);
                self.gate.set_status(ResourceStatus::Unknown);
            }
        }
    }

    fn failed(&self, transition: Transition, source: Error) -> Error {
        Error::ResourceTransitionFailed {
            resource: self.gate.name.clone(),
            transition,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::Subscription;

    #[derive(Clone, Default)]
    struct ScriptedHooks {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_enable: bool,
        fail_suspend: bool,
    }

    impl ScriptedHooks {
        fn record(&self, call: &'static str, fail: bool) -> BoxFuture<'static, Result<()>> {
            self.calls.lock().unwrap().push(call);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if fail {
                    Err(Error::NotConnected)
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    impl ResourceHooks for ScriptedHooks {
        fn enable(&mut self) -> BoxFuture<'_, Result<()>> {
            self.record("enable", self.fail_enable)
        }

        fn disable(&mut self) -> BoxFuture<'_, Result<()>> {
            self.record("disable", false)
        }

        fn suspend(&mut self) -> BoxFuture<'_, Result<()>> {
            self.record("suspend", self.fail_suspend)
        }

        fn resume(&mut self) -> BoxFuture<'_, Result<()>> {
            self.record("resume", false)
        }
    }

    fn statuses(sub: &mut Subscription) -> Vec<ResourceStatus> {
        let mut out = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let Event::ResourceStatus { status, .. } = event {
                out.push(status);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_then_disable_ends_disabled() {
        let events = EventDispatcher::default();
        let mut sub = events.subscribe();
        let resource = ResourceLifecycle::new("GSM", ScriptedHooks::default(), events);
        assert_eq!(resource.status(), ResourceStatus::Unknown);

        let enable = resource.enable();
        let disable = resource.disable();
        disable.await.unwrap();
        enable.await.unwrap();

        assert_eq!(resource.status(), ResourceStatus::Disabled);
        assert_eq!(
            statuses(&mut sub),
            [
                ResourceStatus::Enabling,
                ResourceStatus::Enabled,
                ResourceStatus::Disabling,
                ResourceStatus::Disabled,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_enable_is_forced_through_disable() {
        let events = EventDispatcher::default();
        let mut sub = events.subscribe();
        let hooks = ScriptedHooks {
            fail_enable: true,
            ..ScriptedHooks::default()
        };
        let calls = Arc::clone(&hooks.calls);
        let resource = ResourceLifecycle::new("GSM", hooks, events);

        let err = resource.enable().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceTransitionFailed {
                transition: Transition::Enable,
                ..
            }
        ));
        assert_eq!(
            statuses(&mut sub),
            [
                ResourceStatus::Enabling,
                ResourceStatus::Disabling,
                ResourceStatus::Disabled,
            ]
        );
        assert_eq!(*calls.lock().unwrap(), ["enable", "disable"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_events_flush_in_order_once_enabled() {
        let events = EventDispatcher::default();
        let resource = ResourceLifecycle::new("GSM", ScriptedHooks::default(), events.clone());
        let gate = resource.gate();
        let mut sub = events.subscribe();

        gate.emit_queued(Event::signal("Status", ["1"]));
        gate.emit_queued(Event::signal("SignalStrength", ["20"]));
        assert!(sub.try_recv().is_none());

        resource.enable().await.unwrap();
        gate.emit_queued(Event::signal("Status", ["5"]));

        let signals: Vec<Event> = std::iter::from_fn(|| sub.try_recv())
            .filter(|e| matches!(e, Event::Signal { .. }))
            .collect();
        assert_eq!(
            signals,
            [
                Event::signal("Status", ["1"]),
                Event::signal("SignalStrength", ["20"]),
                Event::signal("Status", ["5"]),
            ]
        );

        // flushed exactly once
        resource.disable().await.unwrap();
        resource.enable().await.unwrap();
        assert!(std::iter::from_fn(|| sub.try_recv()).all(|e| !matches!(e, Event::Signal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checked_events_dropped_while_not_enabled() {
        let events = EventDispatcher::default();
        let resource = ResourceLifecycle::new("GSM", NoHooks, events.clone());
        let gate = resource.gate();
        let mut sub = events.subscribe();

        gate.emit_checked(Event::signal("CallStatus", ["incoming"]));
        assert!(matches!(
            gate.check_enabled(),
            Err(Error::ResourceNotEnabled { .. })
        ));

        resource.enable().await.unwrap();
        gate.check_enabled().unwrap();
        gate.emit_checked(Event::signal("CallStatus", ["release"]));

        let signals: Vec<Event> = std::iter::from_fn(|| sub.try_recv())
            .filter(|e| matches!(e, Event::Signal { .. }))
            .collect();
        assert_eq!(signals, [Event::signal("CallStatus", ["release"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_resume() {
        let hooks = ScriptedHooks::default();
        let calls = Arc::clone(&hooks.calls);
        let resource = ResourceLifecycle::new("GSM", hooks, EventDispatcher::default());

        // nothing to suspend or resume before enabling
        resource.suspend().await.unwrap();
        resource.resume().await.unwrap();
        assert_eq!(resource.status(), ResourceStatus::Unknown);

        resource.enable().await.unwrap();
        resource.suspend().await.unwrap();
        assert_eq!(resource.status(), ResourceStatus::Suspended);
        resource.suspend().await.unwrap();
        resource.resume().await.unwrap();
        assert_eq!(resource.status(), ResourceStatus::Enabled);

        assert_eq!(*calls.lock().unwrap(), ["enable", "suspend", "resume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_suspend_stays_enabled() {
        let hooks = ScriptedHooks {
            fail_suspend: true,
            ..ScriptedHooks::default()
        };
        let resource = ResourceLifecycle::new("GSM", hooks, EventDispatcher::default());

        resource.enable().await.unwrap();
        assert!(resource.suspend().await.is_err());
        assert_eq!(resource.status(), ResourceStatus::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_transitions_are_no_ops() {
        let hooks = ScriptedHooks::default();
        let calls = Arc::clone(&hooks.calls);
        let resource = ResourceLifecycle::new("GSM", hooks, EventDispatcher::default());

        resource.enable().await.unwrap();
        resource.enable().await.unwrap();
        resource.disable().await.unwrap();
        resource.disable().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), ["enable", "disable"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disables() {
        let hooks = ScriptedHooks::default();
        let calls = Arc::clone(&hooks.calls);
        let resource = ResourceLifecycle::new("GSM", hooks, EventDispatcher::default());
        let gate = resource.gate();

        resource.enable().await.unwrap();
        resource.shutdown().await;

        assert_eq!(gate.status(), ResourceStatus::Disabled);
        assert_eq!(*calls.lock().unwrap(), ["enable", "disable"]);
    }
}
