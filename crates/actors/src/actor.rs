use core::fmt;

use crate::mailbox::SendError;

/// How a supervisor reacts when a handler on the actor panics.
#[derive(Debug, Clone)]
pub enum SupervisionStrategy {
    /// Rebuild the actor from its factory and keep consuming the mailbox.
    Restart,
    /// Keep the (possibly inconsistent) actor state and continue.
    Resume,
    /// Stop consuming; the mailbox is dropped.
    Stop,
}

pub trait Actor: Send + Sync + 'static {
    /// Called when a handler on the actor panics. The return value selects
    /// the supervision strategy used to handle the panic.
    /// NOTE: If this method panics, the actor can not recover from the panic.
    #[allow(unused_variables)]
    fn on_fail(&mut self, error: Box<dyn std::any::Any + Send>) -> SupervisionStrategy {
        SupervisionStrategy::Restart
    }
}

#[derive(Debug)]
pub enum ActorError {
    /// The actor's mailbox is closed; it will process no further messages.
    Send(SendError),
    /// The actor dropped the response channel without answering.
    ReceiveAnswer(tokio::sync::oneshot::error::RecvError),
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Send(why) => write!(f, "send failed: {:?}", why),
            Self::ReceiveAnswer(why) => write!(f, "no answer: {:?}", why),
        }
    }
}

impl std::error::Error for ActorError {}
