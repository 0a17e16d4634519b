//! # Task Invoker
//!
//! Command vocabulary, typed message protocols, the handler registry, and the
//! invoker every saga component calls through.

pub mod command;
pub mod command_router;
pub mod invoker;
pub mod message_protocols;

pub use command::CommandType;
pub use command_router::{handler_fn, CommandHandler, FnHandler, HandlerRegistry};
pub use invoker::{CommandExecution, TaskInvoker};
pub use message_protocols::{Acknowledged, CommandRequest};
