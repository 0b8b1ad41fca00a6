//! Validation broadcast hub.
//!
//! Fire-and-forget fan-out of validation outcomes to zero or more
//! subscribers. A send with no subscribers simply drops the message; a slow
//! subscriber lags and skips, never blocking the scheduler.

use tokio::sync::broadcast;

use crate::application::scheduler::TaskOutcome;

#[derive(Clone)]
pub struct ValidationHub {
    tx: broadcast::Sender<TaskOutcome>,
}

impl ValidationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskOutcome> {
        self.tx.subscribe()
    }

    /// Sender handle for the scheduler to publish outcomes on.
    pub fn sender(&self) -> broadcast::Sender<TaskOutcome> {
        self.tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_each_receive_every_outcome() {
        let hub = ValidationHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.sender()
            .send(TaskOutcome {
                key: "users".to_string(),
                result: Ok("clean".to_string()),
            })
            .expect("delivered");

        assert_eq!(first.recv().await.expect("received").key, "users");
        assert_eq!(second.recv().await.expect("received").key, "users");
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let hub = ValidationHub::new(8);

        let result = hub.sender().send(TaskOutcome {
            key: "users".to_string(),
            result: Err("broken".to_string()),
        });

        // No receivers is an Err for the channel, not for the system.
        assert!(result.is_err());
    }
}
