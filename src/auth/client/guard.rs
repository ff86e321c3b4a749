//! Client session guard
//!
//! Mounted around a protected page. Subscribes to session changes before
//! the first read, so nothing announced during the read is lost, and keeps
//! a [`GuardDecision`] derived solely from what the provider last reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::Navigator;
use crate::auth::cancel::CancelToken;
use crate::auth::guard::{GuardDecision, GuardView, evaluate, render};
use crate::auth::provider::{SessionNotice, SessionProvider};
use crate::auth::session::Session;
use crate::config::{GuardConfig, RoutesConfig};
use crate::metrics::GUARD_DECISIONS_TOTAL;

/// A mounted guard
///
/// Dropping it unmounts: the cancel token fires, the watcher task is
/// aborted and its subscription released.
pub struct SessionGuard {
    decision: watch::Receiver<GuardDecision>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl SessionGuard {
    /// Mount a guard for the page at `path`
    ///
    /// Must be called within a Tokio runtime.
    pub fn mount(
        provider: Arc<dyn SessionProvider>,
        navigator: Arc<dyn Navigator>,
        path: impl Into<String>,
        routes: RoutesConfig,
        config: &GuardConfig,
    ) -> Self {
        let (tx, decision) = watch::channel(GuardDecision::Loading);
        let cancel = CancelToken::new();
        let watcher = Watcher {
            provider,
            navigator,
            path: path.into(),
            routes,
            read_timeout: config.session_read_timeout(),
            tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(watcher.run());

        Self {
            decision,
            cancel,
            task,
        }
    }

    /// Latest decision
    pub fn decision(&self) -> GuardDecision {
        self.decision.borrow().clone()
    }

    /// Wait until the decision is no longer `Loading`
    pub async fn settled(&mut self) -> GuardDecision {
        let settled = self
            .decision
            .wait_for(|decision| *decision != GuardDecision::Loading)
            .await
            .map(|decision| decision.clone());
        settled.unwrap_or_else(|_| self.decision())
    }

    /// Wait for the next decision change
    ///
    /// Returns `None` once the guard has stopped watching.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        self.decision.changed().await.ok()?;
        Some(self.decision.borrow_and_update().clone())
    }

    pub fn render<T>(&self, content: impl FnOnce() -> T) -> GuardView<T> {
        render(&self.decision.borrow(), content)
    }

    pub fn unmount(self) {}
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct Watcher {
    provider: Arc<dyn SessionProvider>,
    navigator: Arc<dyn Navigator>,
    path: String,
    routes: RoutesConfig,
    read_timeout: Duration,
    tx: watch::Sender<GuardDecision>,
    cancel: CancelToken,
}

impl Watcher {
    async fn run(self) {
        let mut subscription = self.provider.subscribe();

        let initial = self.read_session().await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.apply(initial.as_ref());

        loop {
            let notice = tokio::select! {
                _ = self.cancel.cancelled() => break,
                notice = subscription.recv() => notice,
            };

            let session = match notice {
                Some(SessionNotice::Changed(event)) => {
                    tracing::debug!(
                        change = ?event.change,
                        path = %self.path,
                        "Session change observed"
                    );
                    event.session
                }
                Some(SessionNotice::Missed(skipped)) => {
                    tracing::debug!(skipped, "Session notifications missed; re-reading");
                    self.read_session().await
                }
                None => break,
            };

            if self.cancel.is_cancelled() {
                break;
            }
            self.apply(session.as_ref());
        }
    }

    /// Current session; a failed or slow read counts as signed out
    async fn read_session(&self) -> Option<Session> {
        match tokio::time::timeout(self.read_timeout, self.provider.current_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Session read failed; treating as signed out");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "Session read timed out; treating as signed out"
                );
                None
            }
        }
    }

    fn apply(&self, session: Option<&Session>) {
        let decision = evaluate(session, &self.path, &self.routes);
        let changed = self.tx.send_if_modified(|current| {
            if *current == decision {
                false
            } else {
                *current = decision.clone();
                true
            }
        });
        if !changed {
            return;
        }

        GUARD_DECISIONS_TOTAL
            .with_label_values(&[decision.label()])
            .inc();
        if let GuardDecision::RedirectTo(target) = &decision {
            tracing::info!(path = %self.path, target = %target, "Guard redirecting");
            self.navigator.replace(target);
        }
    }
}
