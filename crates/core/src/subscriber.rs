use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::ids::SubscriberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The receiving side is gone; the subscription should be dropped.
    #[error("subscriber unreachable")]
    Unreachable,

    /// A bounded mailbox is full; this event was dropped.
    #[error("subscriber mailbox full")]
    Full,
}

/// An event recipient. Delivery never blocks the caller.
#[derive(Debug)]
pub struct Subscriber<T> {
    id: SubscriberId,
    sender: Sender<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<T> Subscriber<T> {
    pub fn new(sender: Sender<T>) -> Self {
        Self {
            id: SubscriberId::new(),
            sender,
        }
    }

    /// An unbounded mailbox and the subscriber that feeds it.
    pub fn channel() -> (Self, Receiver<T>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn deliver(&self, event: T) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Disconnected(_) => DeliveryError::Unreachable,
            TrySendError::Full(_) => DeliveryError::Full,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order() {
        let (subscriber, mailbox) = Subscriber::channel();
        subscriber.deliver(1).unwrap();
        subscriber.deliver(2).unwrap();
        assert_eq!(mailbox.try_iter().collect::<Vec<i32>>(), vec![1, 2]);
    }

    #[test]
    fn dropped_mailbox_is_unreachable() {
        let (subscriber, mailbox) = Subscriber::<i32>::channel();
        drop(mailbox);
        assert_eq!(subscriber.deliver(1), Err(DeliveryError::Unreachable));
    }

    #[test]
    fn full_mailbox_drops_event() {
        let (sender, mailbox) = crossbeam_channel::bounded(1);
        let subscriber = Subscriber::new(sender);
        subscriber.deliver("a").unwrap();
        assert_eq!(subscriber.deliver("b"), Err(DeliveryError::Full));
        assert_eq!(mailbox.recv().unwrap(), "a");
    }

    #[test]
    fn clones_share_identity() {
        let (subscriber, _mailbox) = Subscriber::<()>::channel();
        assert_eq!(subscriber.clone().id(), subscriber.id());
    }
}
