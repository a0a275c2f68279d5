use tokio::sync::oneshot;

use crate::{
    actor::{Actor, ActorError},
    handler::{ActorMessage, Handler, Message},
    mailbox::{Delivery, Mailbox},
};

/// A handle to a running actor. Cheap to clone; sends never block.
pub struct ActorRef<A: Actor> {
    sender: Mailbox<A>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(sender: Mailbox<A>) -> Self {
        Self { sender }
    }

    /// Fire-and-forget. Returns how the message was buffered.
    pub fn tell<M>(&self, msg: M) -> Result<Delivery, ActorError>
    where
        M: Message,
        A: Handler<M>,
    {
        self.sender
            .send(ActorMessage::new(msg, None))
            .map_err(ActorError::Send)
    }

    /// Send and await the handler's response.
    pub async fn ask<M>(&self, msg: M) -> Result<M::Response, ActorError>
    where
        M: Message,
        A: Handler<M>,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::new(msg, Some(response_tx)))
            .map_err(ActorError::Send)?;
        response_rx.await.map_err(ActorError::ReceiveAnswer)
    }

    /// Close the mailbox. Buffered messages still run, then the actor task
    /// exits.
    pub fn stop(&self) {
        self.sender.close();
    }

    /// Messages dropped because the mailbox was full.
    pub fn evicted(&self) -> u64 {
        self.sender.evicted()
    }
}
