//! Caller-facing surface: the stream factory and seekable object streams.

mod factory;
mod seekable;

pub use factory::StreamFactory;
pub use seekable::ObjectStream;
