//! Typed fan-out notifications. Subscribers (e.g. the websocket writer)
//! each get their own receiver with per-subscriber FIFO ordering;
//! producers never block.

use kapowarr_model::Event;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;

/// The process-wide event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Broadcast an event to all subscribers. Events sent while no
    /// subscriber is listening are discarded.
    pub fn emit(&self, event: Event) {
        debug!("Emitting event: {event:?}");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kapowarr_model::VolumeId;

    #[tokio::test]
    async fn test_fan_out_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(Event::VolumeUpdated {
            volume_id: VolumeId(1),
        });
        bus.emit(Event::VolumeDeleted {
            volume_id: VolumeId(1),
        });

        for receiver in [&mut first, &mut second] {
            assert_eq!(
                receiver.recv().await.unwrap(),
                Event::VolumeUpdated {
                    volume_id: VolumeId(1)
                }
            );
            assert_eq!(
                receiver.recv().await.unwrap(),
                Event::VolumeDeleted {
                    volume_id: VolumeId(1)
                }
            );
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(Event::SettingsUpdated);
    }
}
