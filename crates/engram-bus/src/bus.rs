//! The broadcast bus and its per-topic routing.

use engram_types::{EngramError, Event};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all first-class routing topics on the event bus.
///
/// Publishers and subscribers reference a `Topic` variant to ensure
/// messages are delivered only to the correct topic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Transcribed utterances arriving from perception adapters.
    SensorEvents,
    /// Knowledge the agent loop selected for downstream actuators.
    ActionRequests,
    /// Fault notifications: store outages, degraded-loop announcements.
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sensor_events: broadcast::Sender<Event>,
    action_requests: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (sensor_events, _) = broadcast::channel(capacity);
        let (action_requests, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            sensor_events,
            action_requests,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`EngramError::Channel`] when no subscribers are currently listening
    /// on the topic. Callers that treat delivery as best-effort (fault
    /// announcements, action fan-out) may ignore that error.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, EngramError> {
        self.topic_sender(topic).send(event).map_err(|_| {
            EngramError::Channel(format!("no subscribers for topic {topic:?}"))
        })
    }

    /// Subscribe to a specific [`Topic`] channel.
    ///
    /// The returned [`TopicReceiver`] yields only events published to that
    /// topic, starting from the moment of subscription.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SensorEvents => &self.sensor_events,
            Topic::ActionRequests => &self.action_requests,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_types::{EventPayload, SensorEvent};

    fn make_event(source: &str) -> Event {
        Event::new(
            Utc::now(),
            source,
            EventPayload::SensorObservation(SensorEvent {
                speaker: Some("alice".to_string()),
                transcript: "the dragon has 40 hp".to_string(),
                confidence: 0.9,
                timestamp: Utc::now(),
            }),
        )
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SensorEvents);

        let event = make_event("perception::mic");
        bus.publish_to(Topic::SensorEvents, event.clone())?;

        let received = rx.recv().await?;
        assert_eq!(received.id, event.id);
        assert_eq!(received.source, event.source);
        Ok(())
    }

    /// Two independent subscribers on the same topic both receive the event.
    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::ActionRequests);
        let mut subscriber2 = bus.subscribe_to(Topic::ActionRequests);

        let event = make_event("kernel::loop");
        bus.publish_to(Topic::ActionRequests, event.clone())?;

        let recv1 = subscriber1.recv().await.expect("subscriber 1 must receive");
        let recv2 = subscriber2.recv().await.expect("subscriber 2 must receive");

        assert_eq!(recv1.id, event.id, "subscriber 1 got wrong event");
        assert_eq!(recv2.id, event.id, "subscriber 2 got wrong event");
        Ok(())
    }

    /// A subscriber on `SystemAlerts` must not receive events published to
    /// `SensorEvents` because they are routed through separate channels.
    #[tokio::test]
    async fn subscriber_does_not_receive_other_topic_events()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts_sub = bus.subscribe_to(Topic::SystemAlerts);
        let _sensor_sub = bus.subscribe_to(Topic::SensorEvents);

        bus.publish_to(Topic::SensorEvents, make_event("perception::mic"))?;

        // The SystemAlerts subscriber should time out – nothing was sent to it.
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts_sub.recv()).await;

        assert!(
            result.is_err(),
            "SystemAlerts subscriber must not receive a SensorEvents event"
        );
        Ok(())
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::SensorEvents, make_event("test"));
        assert!(matches!(result, Err(EngramError::Channel(_))));
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn channel_lag_on_slow_subscriber() {
        const CAPACITY: usize = 64;
        let bus = EventBus::new(CAPACITY);
        let mut slow_sub = bus.subscribe_to(Topic::SensorEvents);

        for _ in 0..10_000 {
            let _ = bus.publish_to(Topic::SensorEvents, make_event("flood::mic"));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
