//! A bounded mailbox that prefers fresh messages over old ones.
//!
//! For a realtime consumer a stale buffered observation is worth less than
//! the one that just arrived, so when the queue is full the OLDEST buffered
//! message is evicted to make room. Sends therefore never block and never
//! fail while the mailbox is open.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

use crate::{handler::MessageHandler, Actor};

/// Smallest capacity that still lets one message buffer while another is
/// being handled.
pub const MIN_CAPACITY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError;

/// What happened to a message handed to [`Mailbox::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Enqueued,
    /// Enqueued, but the oldest buffered message was dropped to make room.
    EvictedOldest,
}

struct State<A: Actor> {
    queue: VecDeque<Box<dyn MessageHandler<A>>>,
    closed: bool,
    evicted: u64,
}

struct Shared<A: Actor> {
    state: Mutex<State<A>>,
    notify: Notify,
    capacity: usize,
}

/// Sending half. Cheap to clone.
pub struct Mailbox<A: Actor>(Arc<Shared<A>>);

impl<A: Actor> Clone for Mailbox<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Actor> Mailbox<A> {
    /// Enqueue a message, evicting the oldest buffered one when full.
    /// Fails only once the mailbox has been closed.
    pub fn send<M>(&self, message: M) -> Result<Delivery, SendError>
    where
        M: MessageHandler<A> + 'static,
    {
        let delivery = {
            let mut state = self.0.state.lock().expect("mailbox lock poisoned");
            if state.closed {
                return Err(SendError);
            }
            let delivery = if state.queue.len() >= self.0.capacity {
                state.queue.pop_front();
                state.evicted += 1;
                Delivery::EvictedOldest
            } else {
                Delivery::Enqueued
            };
            state.queue.push_back(Box::new(message));
            delivery
        };
        self.0.notify.notify_one();
        Ok(delivery)
    }

    /// Close the mailbox. Buffered messages are still delivered; further
    /// sends fail.
    pub fn close(&self) {
        let mut state = self.0.state.lock().expect("mailbox lock poisoned");
        state.closed = true;
        drop(state);
        self.0.notify.notify_one();
    }

    /// Total messages evicted over the mailbox's lifetime.
    pub fn evicted(&self) -> u64 {
        self.0.state.lock().expect("mailbox lock poisoned").evicted
    }
}

/// Receiving half, held by the actor task.
pub struct MailboxReceiver<A: Actor>(Arc<Shared<A>>);

impl<A: Actor> MailboxReceiver<A> {
    /// Next buffered message, or `None` once the mailbox is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Box<dyn MessageHandler<A>>> {
        loop {
            {
                let mut state = self.0.state.lock().expect("mailbox lock poisoned");
                if let Some(message) = state.queue.pop_front() {
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            self.0.notify.notified().await;
        }
    }
}

pub fn bounded_mailbox<A: Actor>(capacity: usize) -> (Mailbox<A>, MailboxReceiver<A>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            closed: false,
            evicted: 0,
        }),
        notify: Notify::new(),
        capacity: capacity.max(MIN_CAPACITY),
    });
    (Mailbox(shared.clone()), MailboxReceiver(shared))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Probe;
    impl Actor for Probe {}

    struct Tag(u32);

    #[async_trait]
    impl MessageHandler<Probe> for Tag {
        async fn handle(&mut self, _actor: &mut Probe) {}
    }

    #[tokio::test]
    async fn full_mailbox_evicts_oldest() {
        let (tx, mut rx) = bounded_mailbox::<Probe>(2);
        assert_eq!(tx.send(Tag(1)).unwrap(), Delivery::Enqueued);
        assert_eq!(tx.send(Tag(2)).unwrap(), Delivery::Enqueued);
        assert_eq!(tx.send(Tag(3)).unwrap(), Delivery::EvictedOldest);
        assert_eq!(tx.evicted(), 1);

        // two messages remain
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        tx.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_mailbox_rejects_sends_but_drains() {
        let (tx, mut rx) = bounded_mailbox::<Probe>(4);
        tx.send(Tag(1)).unwrap();
        tx.close();
        assert_eq!(tx.send(Tag(2)), Err(SendError));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
