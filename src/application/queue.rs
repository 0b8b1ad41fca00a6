//! Serial mutation queue.
//!
//! A dedicated task owns the mutable state; queued turns receive exclusive
//! access to it one at a time, strictly in submission order. Mutual exclusion
//! is structural — no lock ever guards the state. A turn's failure is
//! delivered to its own caller only and never disturbs later turns.

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("mutation queue is closed")]
pub struct QueueClosed;

type Turn<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

pub struct SerialMutationQueue<S> {
    tx: mpsc::UnboundedSender<Turn<S>>,
}

impl<S> Clone for SerialMutationQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> SerialMutationQueue<S> {
    pub fn new(state: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Turn<S>>();

        tokio::spawn(async move {
            let mut state = state;
            while let Some(turn) = rx.recv().await {
                turn(&mut state).await;
            }
        });

        Self { tx }
    }

    /// Run one turn against the state and await its outcome.
    ///
    /// Turns submitted earlier complete before this one starts. The turn's
    /// own result travels back over a oneshot; a dropped reply means the
    /// queue worker is gone.
    pub async fn run<T, F>(&self, turn: F) -> Result<T, QueueClosed>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Turn<S> = Box::new(move |state| {
            Box::pin(async move {
                let outcome = turn(state).await;
                let _ = reply_tx.send(outcome);
            })
        });

        self.tx.send(job).map_err(|_| QueueClosed)?;
        reply_rx.await.map_err(|_| QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn turns_run_in_submission_order() {
        let queue = SerialMutationQueue::new(Vec::<u32>::new());

        for i in 0..5u32 {
            queue
                .run(move |state: &mut Vec<u32>| {
                    Box::pin(async move {
                        // Suspending mid-turn must not let a later turn overtake.
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        state.push(i);
                    })
                })
                .await
                .expect("turn ran");
        }

        let seen = queue
            .run(|state: &mut Vec<u32>| Box::pin(async move { state.clone() }))
            .await
            .expect("turn ran");
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concurrent_submissions_never_overlap() {
        let queue = SerialMutationQueue::new(0u32);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue
                        .run(|state: &mut u32| {
                            Box::pin(async move {
                                let before = *state;
                                tokio::time::sleep(Duration::from_millis(1)).await;
                                // A lost update here would prove overlap.
                                *state = before + 1;
                            })
                        })
                        .await
                        .expect("turn ran");
                })
            })
            .collect();

        for handle in handles {
            handle.await.expect("joined");
        }

        let total = queue
            .run(|state: &mut u32| Box::pin(async move { *state }))
            .await
            .expect("turn ran");
        assert_eq!(total, 8);
    }

    #[tokio::test]
    async fn a_failed_turn_does_not_disturb_later_turns() {
        let queue = SerialMutationQueue::new(Vec::<&'static str>::new());

        let failed: Result<(), &'static str> = queue
            .run(|_state: &mut Vec<&'static str>| {
                Box::pin(async move { Err("turn failed") })
            })
            .await
            .expect("queue alive");
        assert_eq!(failed, Err("turn failed"));

        queue
            .run(|state: &mut Vec<&'static str>| {
                Box::pin(async move { state.push("still serving") })
            })
            .await
            .expect("turn ran");

        let seen = queue
            .run(|state: &mut Vec<&'static str>| Box::pin(async move { state.clone() }))
            .await
            .expect("turn ran");
        assert_eq!(seen, ["still serving"]);
    }
}
