//! The handler contract invoked by [`crate::EventBus::publish`].

use fractal_core::{Result, Task};

/// A primary handler for one [`fractal_core::ActionKind`]. Mutates the task
/// (setting `result`/`error`/`status`) and hands it back.
///
/// Errors are caught by the bus and folded into `task.error` rather than
/// propagated to the publisher — a handler cannot crash the bus.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<Task>;
}

/// A passive listener registered via [`crate::EventBus::subscribe`]. Invoked
/// fire-and-forget on every publish for its action, regardless of
/// `wait_result`; it cannot affect the task returned to the publisher.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, task: &Task);
}
