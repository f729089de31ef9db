use crate::message::BusMessage;
use async_trait::async_trait;
use conductor_core::ConductorResult;

/// Subscriber callback invoked for every message on its topic.
///
/// An `Err` (or a panic) is logged by the bus and does not stop delivery to
/// the remaining subscribers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BusMessage) -> ConductorResult<()>;
}

/// Adapter turning a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&BusMessage) -> ConductorResult<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&BusMessage) -> ConductorResult<()> + Send + Sync,
{
    async fn handle(&self, message: &BusMessage) -> ConductorResult<()> {
        (self.f)(message)
    }
}
