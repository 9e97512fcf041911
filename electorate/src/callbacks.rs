//! Leadership transition hooks.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::elector::LeaderStatus;

/// Hooks invoked by the election loop on leadership transitions.
///
/// Hooks run inline on the loop's task, one at a time and in order. A hook
/// that blocks delays the next renewal, so long-running work belongs on a
/// separate task:
///
/// ```rust
/// use electorate::LeaderCallbacks;
/// use tokio_util::sync::CancellationToken;
///
/// struct Reconciler;
///
/// impl LeaderCallbacks for Reconciler {
///     fn on_started_leading(&self, leadership: CancellationToken) {
///         tokio::spawn(async move {
///             tokio::select! {
///                 _ = reconcile_forever() => {}
///                 _ = leadership.cancelled() => {}
///             }
///         });
///     }
/// }
///
/// async fn reconcile_forever() {
///     // ..mutate shared state
/// }
/// ```
pub trait LeaderCallbacks: Send + Sync {
    /// This instance became the leader.
    ///
    /// `leadership` is cancelled as soon as this leadership term ends, before
    /// [`LeaderCallbacks::on_stopped_leading`] is invoked.
    fn on_started_leading(&self, leadership: CancellationToken) {
        let _ = leadership;
    }

    /// This instance stopped being the leader, either because a renewal failed
    /// or because the loop was cancelled.
    fn on_stopped_leading(&self) {}

    /// Another identity was observed holding the lease while this instance was a candidate.
    fn on_new_leader(&self, identity: &str) {
        let _ = identity;
    }
}

/// No-op callbacks, for callers that only poll [`LeaderStatus`].
impl LeaderCallbacks for () {}

impl<T> LeaderCallbacks for std::sync::Arc<T>
where
    T: LeaderCallbacks + ?Sized,
{
    fn on_started_leading(&self, leadership: CancellationToken) {
        (**self).on_started_leading(leadership)
    }

    fn on_stopped_leading(&self) {
        (**self).on_stopped_leading()
    }

    fn on_new_leader(&self, identity: &str) {
        (**self).on_new_leader(identity)
    }
}

/// Turns loop transitions into callback invocations.
///
/// Guarantees one `on_started_leading` per transition into leadership, one
/// `on_stopped_leading` per transition out of it, and one `on_new_leader` per
/// distinct holder observed.
pub(crate) struct CallbackDispatcher {
    callbacks: Box<dyn LeaderCallbacks>,
    status: LeaderStatus,
    leadership: Option<CancellationToken>,
    last_observed: Option<String>,
}

impl CallbackDispatcher {
    pub(crate) fn new(callbacks: Box<dyn LeaderCallbacks>, status: LeaderStatus) -> Self {
        Self {
            callbacks,
            status,
            leadership: None,
            last_observed: None,
        }
    }

    pub(crate) fn status(&self) -> &LeaderStatus {
        &self.status
    }

    pub(crate) fn started_leading(&mut self, identity: &str) {
        if self.leadership.is_some() {
            return;
        }
        info!(%identity, "Became leader");

        let token = CancellationToken::new();
        self.leadership = Some(token.clone());
        self.last_observed = Some(identity.to_string());
        self.status.set_leading(true);
        self.callbacks.on_started_leading(token);
    }

    pub(crate) fn stopped_leading(&mut self, identity: &str) {
        let Some(token) = self.leadership.take() else {
            return;
        };
        info!(%identity, "Stopped leading");

        token.cancel();
        self.status.set_leading(false);
        self.callbacks.on_stopped_leading();
    }

    /// Record the holder seen while a candidate. Empty holders are ignored.
    pub(crate) fn observed_leader(&mut self, holder: &str) {
        if self.leadership.is_some() || holder.is_empty() {
            return;
        }
        if self.last_observed.as_deref() == Some(holder) {
            return;
        }
        info!(leader = %holder, "New leader elected");

        self.last_observed = Some(holder.to_string());
        self.callbacks.on_new_leader(holder);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Transition as seen by a [`RecordingCallbacks`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Started,
        Stopped,
        NewLeader(String),
    }

    /// Callbacks that remember every invocation and the last leadership token.
    #[derive(Default)]
    pub(crate) struct RecordingCallbacks {
        events: Mutex<Vec<Event>>,
        leadership: Mutex<Option<CancellationToken>>,
        notify: tokio::sync::Notify,
    }

    impl RecordingCallbacks {
        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn count(&self, event: &Event) -> usize {
            self.events().iter().filter(|e| *e == event).count()
        }

        pub(crate) fn leadership(&self) -> Option<CancellationToken> {
            self.leadership.lock().unwrap().clone()
        }

        /// Wait until `predicate` holds for the recorded events.
        pub(crate) async fn wait_for<F>(&self, predicate: F)
        where
            F: Fn(&[Event]) -> bool,
        {
            loop {
                let notified = self.notify.notified();
                if predicate(&self.events()) {
                    return;
                }
                notified.await;
            }
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
            self.notify.notify_waiters();
        }
    }

    impl LeaderCallbacks for RecordingCallbacks {
        fn on_started_leading(&self, leadership: CancellationToken) {
            *self.leadership.lock().unwrap() = Some(leadership);
            self.push(Event::Started);
        }

        fn on_stopped_leading(&self) {
            self.push(Event::Stopped);
        }

        fn on_new_leader(&self, identity: &str) {
            self.push(Event::NewLeader(identity.to_string()));
        }
    }

    fn dispatcher() -> (CallbackDispatcher, Arc<RecordingCallbacks>) {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let dispatcher = CallbackDispatcher::new(
            Box::new(callbacks.clone()),
            LeaderStatus::new(CancellationToken::new()),
        );
        (dispatcher, callbacks)
    }

    #[test]
    fn started_and_stopped_fire_once_per_transition() {
        let (mut dispatcher, callbacks) = dispatcher();

        dispatcher.started_leading("me");
        dispatcher.started_leading("me");
        assert!(dispatcher.status().leading());

        dispatcher.stopped_leading("me");
        dispatcher.stopped_leading("me");
        assert!(!dispatcher.status().leading());

        assert_eq!(callbacks.events(), vec![Event::Started, Event::Stopped]);
    }

    #[test]
    fn stopped_without_started_is_silent() {
        let (mut dispatcher, callbacks) = dispatcher();
        dispatcher.stopped_leading("me");
        assert!(callbacks.events().is_empty());
    }

    #[test]
    fn leadership_token_cancelled_on_stop() {
        let (mut dispatcher, callbacks) = dispatcher();
        dispatcher.started_leading("me");

        let token = callbacks.leadership().unwrap();
        assert!(!token.is_cancelled());
        dispatcher.stopped_leading("me");
        assert!(token.is_cancelled());
    }

    #[test]
    fn new_leader_deduplicated() {
        let (mut dispatcher, callbacks) = dispatcher();

        dispatcher.observed_leader("a");
        dispatcher.observed_leader("a");
        dispatcher.observed_leader("");
        dispatcher.observed_leader("b");
        dispatcher.observed_leader("a");

        assert_eq!(
            callbacks.events(),
            vec![
                Event::NewLeader("a".into()),
                Event::NewLeader("b".into()),
                Event::NewLeader("a".into()),
            ]
        );
    }

    #[test]
    fn new_leader_suppressed_while_leading() {
        let (mut dispatcher, callbacks) = dispatcher();

        dispatcher.started_leading("me");
        dispatcher.observed_leader("other");
        dispatcher.stopped_leading("me");
        dispatcher.observed_leader("other");

        assert_eq!(
            callbacks.events(),
            vec![
                Event::Started,
                Event::Stopped,
                Event::NewLeader("other".into()),
            ]
        );
    }
}
