#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod dispatch;
mod error;
mod handler;
mod listener;
mod message;
mod method;
mod registry;
mod service;

pub use dispatch::*;
pub use error::*;
pub use handler::*;
pub use listener::*;
pub use message::*;
pub use method::*;
pub use registry::*;
pub use service::*;
