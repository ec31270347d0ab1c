//! The event bus (C2): the uniform task/event fabric every component
//! communicates through. One primary handler answers each action; any
//! number of passive subscribers observe publishes; a bounded, multi-
//! indexed history backs typed queries and the `delegate_task` helper.

pub mod bus;
pub mod handler;
pub mod history;

pub use bus::{BusConfig, EventBus};
pub use handler::{Handler, Subscriber};
