//! Live revision tracking.
//!
//! The watcher consumes session events one at a time. A push on the info
//! path carrying a different primary revision, or a reconnect after which
//! the info record shows one, starts a re-sync. At most one re-sync is in
//! flight and it runs alongside the event loop: a newer trigger, or the
//! connection dropping under it, replaces it with a fresh attempt, so a
//! request lost with the old connection never stalls the watcher and the
//! generation published last is always the newest.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use spacebook_shared::{PublishedBook, Result};
use spacebook_transport::{SessionEvent, SessionHandle};

use crate::pipeline::SyncContext;

/// Field of the info record holding the primary revision.
const PRIMARY_REVISION: &str = "primaryRevision";

/// Notifications for book subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    /// A new generation was published.
    Refreshed { revision: String },
    /// The session gave up reconnecting; no further updates will arrive.
    Closed { reason: String },
}

/// Resolves to `None` when the revision turned out unchanged.
type Attempt = Pin<Box<dyn Future<Output = Result<Option<PublishedBook>>> + Send>>;

/// The re-sync currently running.
struct InFlight {
    /// Revision announced by the push that started it; `None` for a recheck.
    target: Option<String>,
    attempt: Attempt,
}

pub(crate) struct UpdateWatcher {
    session: SessionHandle,
    context: SyncContext,
    published: watch::Sender<Arc<PublishedBook>>,
    events: broadcast::Sender<BookEvent>,
}

impl UpdateWatcher {
    pub(crate) fn new(
        session: SessionHandle,
        context: SyncContext,
        published: watch::Sender<Arc<PublishedBook>>,
        events: broadcast::Sender<BookEvent>,
    ) -> Self {
        Self {
            session,
            context,
            published,
            events,
        }
    }

    /// Run the watcher on `session_events` until the session dies.
    pub(crate) fn spawn(self, session_events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(session_events))
    }

    #[instrument(skip_all, fields(book = %self.context.id))]
    async fn run(self, mut session_events: broadcast::Receiver<SessionEvent>) {
        let info_path = self.context.bootstrap.info_path();
        let mut in_flight: Option<InFlight> = None;
        let mut recheck_on_connect = false;

        loop {
            tokio::select! {
                biased;

                event = session_events.recv() => match event {
                    Ok(SessionEvent::Push(push)) if push.concerns(&info_path) => {
                        match push.data.get(PRIMARY_REVISION).and_then(Value::as_str) {
                            Some(revision) => self.on_revision(revision, &mut in_flight),
                            None => trace!("info push without a revision"),
                        }
                    }
                    Ok(SessionEvent::Push(push)) => trace!(path = %push.path, "unrelated push"),
                    Ok(SessionEvent::Reconnecting) => {
                        if in_flight.take().is_some() {
                            debug!("connection lost, dropping re-sync in flight");
                        }
                        recheck_on_connect = true;
                    }
                    Ok(SessionEvent::Connected) => {
                        if recheck_on_connect {
                            recheck_on_connect = false;
                            in_flight = Some(self.start(None));
                        }
                    }
                    Ok(SessionEvent::Fatal(reason)) => {
                        warn!(%reason, "session lost, no further updates");
                        let _ = self.events.send(BookEvent::Closed { reason });
                        return;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "missed session events, rechecking revision");
                        in_flight = Some(self.start(None));
                    }
                    Err(RecvError::Closed) => return,
                },

                outcome = settle(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    self.publish(outcome);
                }
            }
        }
    }

    fn current_revision(&self) -> String {
        self.published.borrow().revision.clone()
    }

    fn on_revision(&self, revision: &str, in_flight: &mut Option<InFlight>) {
        let running = in_flight.as_ref().and_then(|f| f.target.as_deref());
        if running == Some(revision) {
            trace!(%revision, "re-sync to this revision already running");
            return;
        }

        let current = self.current_revision();
        if revision == current {
            if in_flight.take().is_some() {
                debug!(%revision, "revision back to current, dropping re-sync in flight");
            } else {
                debug!(%revision, "revision unchanged");
            }
            return;
        }

        if in_flight.is_some() {
            debug!(%revision, "newer revision announced, restarting re-sync");
        }
        info!(from = %current, to = %revision, "revision changed");
        *in_flight = Some(self.start(Some(revision.to_string())));
    }

    /// Start a re-sync. Without a target revision the info record is checked
    /// first and an unchanged revision ends the attempt.
    fn start(&self, target: Option<String>) -> InFlight {
        let context = self.context.clone();
        let session = self.session.clone();
        let current = self.current_revision();
        let recheck = target.is_none();

        let attempt: Attempt = Box::pin(async move {
            let info = context.fetch_info(&session).await?;
            if recheck {
                if info.primary_revision == current {
                    debug!(revision = %current, "revision unchanged");
                    return Ok(None);
                }
                info!(from = %current, to = %info.primary_revision, "revision changed");
            }
            context.sync_with(&session, info).await.map(Some)
        });

        InFlight { target, attempt }
    }

    fn publish(&self, outcome: Result<Option<PublishedBook>>) {
        match outcome {
            Ok(Some(book)) if book.revision == self.current_revision() => {
                debug!(revision = %book.revision, "revision already published");
            }
            Ok(Some(book)) => {
                let revision = book.revision.clone();
                self.published.send_replace(Arc::new(book));
                info!(%revision, "book refreshed");
                let _ = self.events.send(BookEvent::Refreshed { revision });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "re-sync failed, keeping current generation"),
        }
    }
}

async fn settle(in_flight: &mut Option<InFlight>) -> Result<Option<PublishedBook>> {
    match in_flight {
        Some(running) => running.attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use spacebook_discovery::BootstrapState;
    use spacebook_shared::BookId;

    use crate::test_support::{FakeConnector, FakeSpace};
    use crate::toc::IndexOptions;

    struct Harness {
        space: Arc<FakeSpace>,
        session: SessionHandle,
        published: watch::Receiver<Arc<PublishedBook>>,
        events: broadcast::Receiver<BookEvent>,
        watcher: JoinHandle<()>,
    }

    async fn harness() -> Harness {
        let space = FakeSpace::new("r1");
        let session = SessionHandle::open(FakeConnector::new(Arc::clone(&space)), "ws://fake");
        let session_events = session.subscribe();
        session.ready().await.unwrap();

        let context = SyncContext {
            id: BookId::new(),
            bootstrap: BootstrapState {
                project_id: "proj".into(),
                space_id: "s".into(),
                blob_base: "https://blobs/".into(),
            },
            options: IndexOptions::new(Vec::new(), "http://cdn/", "https://blobs/"),
            timeout: None,
        };
        let initial = context.sync(&session).await.unwrap();
        assert_eq!(initial.revision, "r1");

        let (published_tx, published) = watch::channel(Arc::new(initial));
        let (events_tx, events) = broadcast::channel(8);
        let watcher = UpdateWatcher::new(session.clone(), context, published_tx, events_tx)
            .spawn(session_events);

        Harness {
            space,
            session,
            published,
            events,
            watcher,
        }
    }

    #[tokio::test]
    async fn unchanged_revision_does_not_resync() {
        let mut h = harness().await;
        assert_eq!(h.space.revision_queries(), 1);

        h.space.push_info("r1");
        h.space.push_info("r1");
        h.space.set_primary("r2");
        h.space.push_info("r2");

        let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, BookEvent::Refreshed { revision: "r2".into() });

        // One initial sync plus exactly one re-sync.
        assert_eq!(h.space.revision_queries(), 2);
        assert!(h.events.try_recv().is_err());

        let current = h.published.borrow().clone();
        assert_eq!(current.revision, "r2");
        assert_eq!(current.index[1].title(), "Part 2 (revised)");

        h.watcher.abort();
        h.session.close();
    }

    #[tokio::test]
    async fn unrelated_pushes_are_ignored() {
        let mut h = harness().await;
        h.space.push("spaces/s/infos", serde_json::json!({ "name": "Renamed" }));
        h.space.push("spaces/s/revisions/r9", serde_json::json!({ "primaryRevision": "r9" }));
        h.space.set_primary("r2");
        h.space.push_info("r2");
        assert_eq!(
            h.events.recv().await.unwrap(),
            BookEvent::Refreshed { revision: "r2".into() }
        );
        assert_eq!(h.space.revision_queries(), 2);
        h.session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rechecks_revision() {
        let mut h = harness().await;

        // The change lands while the connection is down; its push is lost.
        h.space.set_primary("r2");
        h.space.drop_connection();

        let event = h.events.recv().await.unwrap();
        assert_eq!(event, BookEvent::Refreshed { revision: "r2".into() });
        assert_eq!(h.space.connections(), 2);
        assert_eq!(h.published.borrow().revision, "r2");
        h.session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_without_change_keeps_generation() {
        let h = harness().await;
        let before = Arc::clone(&h.published.borrow());

        h.space.drop_connection();
        // Wait out the first backoff step and the recheck.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.space.connections(), 2);
        assert_eq!(h.space.revision_queries(), 1);
        assert!(Arc::ptr_eq(&before, &h.published.borrow()));
        h.session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn resync_lost_with_connection_is_retried_after_reconnect() {
        let mut h = harness().await;

        // The revision request goes out, then the connection drops under it.
        h.space.swallow_next_revision();
        h.space.set_primary("r2");
        h.space.push_info("r2");

        let event = tokio::time::timeout(Duration::from_secs(600), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, BookEvent::Refreshed { revision: "r2".into() });
        assert_eq!(h.space.connections(), 2);
        assert_eq!(h.published.borrow().revision, "r2");
        h.session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn newer_push_supersedes_running_resync() {
        let mut h = harness().await;
        h.space.delay_revisions(Duration::from_secs(10));

        h.space.set_primary("r2");
        h.space.push_info("r2");
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.space.set_primary("r3");
        h.space.push_info("r3");

        let event = tokio::time::timeout(Duration::from_secs(60), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, BookEvent::Refreshed { revision: "r3".into() });

        // The stale r2 answer lands too, but is never published.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.space.revision_queries(), 3);
        assert!(h.events.try_recv().is_err());
        let current = h.published.borrow().clone();
        assert_eq!(current.revision, "r3");
        assert_eq!(current.index[1].title(), "Part 2 (final)");
        h.session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_session_closes_book() {
        let mut h = harness().await;
        h.space.refuse_connections();
        h.space.drop_connection();

        match h.events.recv().await.unwrap() {
            BookEvent::Closed { reason } => assert!(reason.contains("connection refused")),
            other => panic!("expected closed, got {other:?}"),
        }
        h.watcher.await.unwrap();
        assert_eq!(h.published.borrow().revision, "r1");
    }
}
