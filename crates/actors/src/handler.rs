use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::Actor;

#[async_trait]
pub trait Handler<M>: Actor
where
    M: Message,
{
    async fn handle(&mut self, message: M) -> M::Response;
}

pub trait Message: Send + 'static {
    type Response: Send + 'static;
}

#[async_trait]
pub trait MessageHandler<A: Actor>: Send {
    async fn handle(&mut self, actor: &mut A);
}

pub struct ActorMessage<M>
where
    M: Message,
{
    /// Taken on delivery; messages are moved into the handler, not cloned.
    message: Option<M>,
    respond_to: Option<oneshot::Sender<M::Response>>,
}

impl<M> ActorMessage<M>
where
    M: Message,
{
    pub fn new(message: M, respond_to: Option<oneshot::Sender<M::Response>>) -> Self {
        Self {
            message: Some(message),
            respond_to,
        }
    }
}

#[async_trait]
impl<M, A> MessageHandler<A> for ActorMessage<M>
where
    M: Message,
    A: Handler<M>,
{
    async fn handle(&mut self, actor: &mut A) {
        let Some(message) = self.message.take() else {
            // a message is delivered at most once
            return;
        };
        let result = actor.handle(message).await;

        if let Some(respond_to) = self.respond_to.take() {
            if respond_to.send(result).is_err() {
                log::debug!("response receiver dropped before the answer arrived");
            }
        }
    }
}
