//! A small actor runtime for per-vehicle filter workers.
//!
//! One tokio task per actor, fed by a bounded drop-oldest mailbox, with
//! panic supervision so one misbehaving actor never takes down the rest.

use std::panic::AssertUnwindSafe;

use actor::{Actor, SupervisionStrategy};
use actor_ref::ActorRef;
use futures::FutureExt;
use mailbox::bounded_mailbox;
use tokio::task::JoinHandle;

pub mod actor;
pub mod actor_ref;
pub mod handler;
pub mod mailbox;

pub use actor::{ActorError, SupervisionStrategy as Supervision};
pub use actor_ref::ActorRef as Ref;
pub use handler::{Handler, Message};
pub use mailbox::Delivery;

/// Creates and runs a supervised actor. If a handler panics, the actor is
/// restarted, resumed or stopped according to `Actor::on_fail()`.
///
/// The returned join handle resolves once the mailbox is closed and drained
/// (or the actor stops itself).
pub fn run<A, F>(capacity: usize, actor_factory: F) -> (ActorRef<A>, JoinHandle<()>)
where
    A: Actor,
    F: 'static + Send + Fn() -> A,
{
    let (tx, mut rx) = bounded_mailbox(capacity);
    let mut actor = actor_factory();
    let actor_ref = ActorRef::new(tx);

    let handle = tokio::spawn(async move {
        while let Some(mut message) = rx.recv().await {
            let result = AssertUnwindSafe(message.handle(&mut actor))
                .catch_unwind()
                .await;
            if let Err(why) = result {
                log::error!("actor panicked: {:?}", why);
                match actor.on_fail(why) {
                    SupervisionStrategy::Restart => {
                        actor = actor_factory();
                    }
                    SupervisionStrategy::Resume => {}
                    SupervisionStrategy::Stop => {
                        break;
                    }
                };
            }
        }
    });

    (actor_ref, handle)
}

/// Run an actor without supervision: a panicking handler kills the task.
pub fn run_unsupervised<A: Actor>(capacity: usize, mut actor: A) -> (ActorRef<A>, JoinHandle<()>) {
    let (tx, mut rx) = bounded_mailbox(capacity);
    let actor_ref = ActorRef::new(tx);

    let handle = tokio::spawn(async move {
        while let Some(mut message) = rx.recv().await {
            message.handle(&mut actor).await;
        }
    });

    (actor_ref, handle)
}
