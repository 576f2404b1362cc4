// Editing session: one task per open document owning its `LineTracker`.
//
// Change events, reconciliation and identifier reads/writes are queued on a
// single mpsc channel and handled strictly in order, so a corrective write
// made while handling one event can never interleave with the next.

use scriptdesk_common::delta::{Delta, DeltaError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::lines::reconcile::Reconciliation;
use crate::lines::surface::{DocumentSurface, LineSurface};
use crate::lines::tracker::{ChangeReport, EditOutcome, LineTracker, TrackerState};
use crate::lines::LineObservation;

/// Queue depth before senders start waiting.
const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("editing session has shut down")]
    Closed,
}

type Job<S> = Box<dyn FnOnce(&mut LineTracker<S>) + Send>;

/// Spawns the session task. Requires a running tokio runtime.
pub fn spawn_session<S>(tracker: LineTracker<S>) -> SessionHandle<S>
where
    S: LineSurface + Send + 'static,
{
    let (jobs_tx, jobs_rx) = mpsc::channel::<Job<S>>(COMMAND_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(session_loop(tracker, jobs_rx, shutdown_rx));
    SessionHandle { jobs: jobs_tx, shutdown: shutdown_tx }
}

async fn session_loop<S: LineSurface>(
    mut tracker: LineTracker<S>,
    mut jobs: mpsc::Receiver<Job<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("editing session shutting down");
                break;
            }
            job = jobs.recv() => match job {
                Some(job) => job(&mut tracker),
                None => {
                    debug!("all session handles dropped");
                    break;
                }
            },
        }
    }
}

/// Cloneable handle to a running session.
pub struct SessionHandle<S> {
    jobs: mpsc::Sender<Job<S>>,
    shutdown: watch::Sender<bool>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self { jobs: self.jobs.clone(), shutdown: self.shutdown.clone() }
    }
}

impl<S: LineSurface + Send + 'static> SessionHandle<S> {
    /// Runs `job` on the session task after every previously queued job.
    pub async fn run<R, F>(&self, job: F) -> Result<R, SessionError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LineTracker<S>) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |tracker| {
            let _ = reply_tx.send(job(tracker));
        });
        self.jobs.send(job).await.map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn on_content_changed(
        &self,
        lines: Vec<LineObservation>,
    ) -> Result<ChangeReport, SessionError> {
        self.run(move |tracker| tracker.on_content_changed(&lines)).await
    }

    pub async fn reconcile(
        &self,
        user_id: Option<String>,
    ) -> Result<Option<Reconciliation>, SessionError> {
        self.run(move |tracker| tracker.reconcile(user_id.as_deref())).await
    }

    pub async fn identifier(&self, line_index: usize) -> Result<Option<String>, SessionError> {
        self.run(move |tracker| tracker.get_identifier(line_index).map(str::to_owned)).await
    }

    pub async fn set_identifier(
        &self,
        line_index: usize,
        identifier: String,
    ) -> Result<bool, SessionError> {
        self.run(move |tracker| tracker.set_identifier(line_index, &identifier)).await
    }

    pub async fn state(&self) -> Result<TrackerState, SessionError> {
        self.run(|tracker| tracker.state()).await
    }

    /// Stops the session task; queued jobs that have not started are dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl SessionHandle<DocumentSurface> {
    pub async fn apply_edit(
        &self,
        change: Delta,
        user_id: Option<String>,
    ) -> Result<Result<EditOutcome, DeltaError>, SessionError> {
        self.run(move |tracker| tracker.apply_edit(&change, user_id.as_deref())).await
    }

    pub async fn document(&self) -> Result<Delta, SessionError> {
        self.run(|tracker| tracker.document().clone()).await
    }

    /// Swaps in a freshly loaded document, e.g. after an approval.
    pub async fn load_document(&self, document: Delta) -> Result<TrackerState, SessionError> {
        self.run(move |tracker| tracker.load_document(document)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::reconcile::MatchOptions;

    fn document_session(text: &str) -> SessionHandle<DocumentSurface> {
        let tracker =
            LineTracker::for_document(Delta::new().insert(text, None), MatchOptions::default());
        spawn_session(tracker)
    }

    #[tokio::test]
    async fn commands_are_processed_in_order() {
        let session = document_session("foo\nbar\n");
        session.reconcile(Some("ada".into())).await.unwrap().expect("tracker is ready");
        let foo = session.identifier(0).await.unwrap().expect("assigned");

        let first = session.apply_edit(Delta::new().retain(4, None).insert("\n", None), None);
        let second = session.identifier(0);
        let (edit, identifier) = tokio::join!(first, second);

        let outcome = edit.unwrap().expect("edit applies");
        assert_eq!(outcome.reconciliation.expect("ready").stats.regenerated, 1);
        assert_eq!(identifier.unwrap().as_deref(), Some(foo.as_str()));

        let document = session.document().await.unwrap();
        assert_eq!(document.line_texts(), vec!["foo", "", "bar"]);
    }

    #[tokio::test]
    async fn set_identifier_round_trips_through_the_session() {
        let session = document_session("only\n");
        assert!(session.set_identifier(0, "fixed".into()).await.unwrap());
        assert_eq!(session.identifier(0).await.unwrap().as_deref(), Some("fixed"));
        assert_eq!(session.state().await.unwrap(), TrackerState::Ready);
    }

    #[tokio::test]
    async fn load_document_reinitializes_from_stored_identifiers() {
        let session = document_session("old\n");
        session.reconcile(None).await.unwrap();

        let state = session
            .load_document(Delta::new().insert("new\nlines\n", None))
            .await
            .unwrap();
        assert_eq!(state, TrackerState::Ready);
        assert_eq!(session.identifier(0).await.unwrap(), None);
        assert_eq!(session.document().await.unwrap().line_texts(), vec!["new", "lines"]);
    }

    #[tokio::test]
    async fn shutdown_closes_the_session() {
        let session = document_session("x\n");
        session.shutdown();
        assert_eq!(session.state().await, Err(SessionError::Closed));
    }
}
