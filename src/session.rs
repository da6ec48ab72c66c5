//! Interactive query session.
//!
//! A [`QuerySession`] runs one question at a time in a background task and
//! streams its progress over a channel, so a front end stays responsive
//! while retrieval and generation are in flight. A second submission while
//! a question is running is refused with [`SessionBusy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use memory_vault_core::error::RejectReason;
use memory_vault_core::generate::ChatModel;
use memory_vault_core::index::SimilarityIndex;

use crate::ask::{answer_question, AskFailure, AskProgress, AskRequest, AskResponse};
use crate::config::Config;

/// Progress and outcome of one submitted question.
#[derive(Debug)]
pub enum SessionEvent {
    Retrieved {
        chunks: usize,
        sources: Vec<String>,
        fetch_error: Option<String>,
    },
    /// The first answer was rejected and a retry was sent.
    Retrying { reason: RejectReason, detail: String },
    /// Always the last event of a submission.
    Finished(Box<Result<AskResponse, AskFailure>>),
}

impl From<AskProgress> for SessionEvent {
    fn from(progress: AskProgress) -> Self {
        match progress {
            AskProgress::Retrieved {
                chunks,
                sources,
                fetch_error,
            } => SessionEvent::Retrieved {
                chunks,
                sources,
                fetch_error,
            },
            AskProgress::Retrying { reason, detail } => SessionEvent::Retrying { reason, detail },
        }
    }
}

#[derive(Debug, Error)]
#[error("a question is already being answered")]
pub struct SessionBusy;

pub struct QuerySession {
    config: Arc<Config>,
    index: Arc<dyn SimilarityIndex>,
    model: Arc<dyn ChatModel>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the task ends, including on panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QuerySession {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn SimilarityIndex>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            index,
            model,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start answering `request` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        request: AskRequest,
    ) -> Result<mpsc::UnboundedReceiver<SessionEvent>, SessionBusy> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionBusy);
        }
        let guard = InFlight(Arc::clone(&self.in_flight));

        let (tx, rx) = mpsc::unbounded_channel();
        let config = Arc::clone(&self.config);
        let index = Arc::clone(&self.index);
        let model = Arc::clone(&self.model);

        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let result = answer_question(
                &config,
                index.as_ref(),
                model.as_ref(),
                &request,
                move |p| {
                    let _ = progress_tx.send(p.into());
                },
            )
            .await;
            drop(guard);
            let _ = tx.send(SessionEvent::Finished(Box::new(result)));
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_vault_core::generate::ScriptedModel;
    use memory_vault_core::index::memory::InMemoryIndex;
    use memory_vault_core::models::Chunk;

    fn session(replies: &[&str]) -> QuerySession {
        let index = InMemoryIndex::new();
        index.insert_with_distance(
            Chunk::new("s_0", "Backups run nightly at two in the morning.")
                .with_meta("filename", "ops.md"),
            0.25,
        );
        QuerySession::new(
            Arc::new(Config::default()),
            Arc::new(index),
            Arc::new(ScriptedModel::new(replies.iter().copied())),
        )
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_submit_streams_progress_then_result() {
        let session = session(&["They run \"nightly at two in the morning\" [chunk:s_0]"]);
        let rx = session.submit(AskRequest::new("When do backups run?")).unwrap();
        let events = drain(rx).await;

        assert!(matches!(
            events.first(),
            Some(SessionEvent::Retrieved { chunks: 1, .. })
        ));
        match events.last() {
            Some(SessionEvent::Finished(result)) => {
                let resp = (**result).as_ref().unwrap();
                assert_eq!(resp.answer.attempts, 1);
            }
            other => panic!("unexpected last event: {other:?}"),
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_second_submit_while_busy_is_refused() {
        let session = session(&["\"nightly at two in the morning\" [chunk:s_0]"]);
        let rx = session.submit(AskRequest::new("first")).unwrap();
        assert!(session.is_busy());
        assert!(session.submit(AskRequest::new("second")).is_err());

        drain(rx).await;
        assert!(!session.is_busy());
    }
}
