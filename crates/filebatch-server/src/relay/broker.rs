//! In-process message broker
//!
//! A named broadcast topic of short text messages. Every subscriber sees every message
//! published after it subscribed.

use tokio::sync::broadcast;

pub const DEFAULT_TOPIC: &str = "messages";
const TOPIC_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct Broker {
    topic: String,
    sender: broadcast::Sender<String>,
}

impl Broker {
    pub fn new(topic: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            topic: topic.into(),
            sender,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `message` and return how many subscribers will receive it
    pub fn publish(&self, message: impl Into<String>) -> usize {
        match self.sender.send(message.into()) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(dropped)) => {
                tracing::warn!(topic = %self.topic, message = %dropped, "No subscribers, message dropped");
                0
            },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_message() {
        let broker = Broker::default();
        let mut first = broker.subscribe();
        let mut second = broker.subscribe();

        assert_eq!(broker.publish("alice"), 2);
        assert_eq!(first.recv().await.unwrap(), "alice");
        assert_eq!(second.recv().await.unwrap(), "alice");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let broker = Broker::new("names");
        assert_eq!(broker.publish("bob"), 0);
        assert_eq!(broker.topic(), "names");
    }
}
