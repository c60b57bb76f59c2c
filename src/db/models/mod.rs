//! Data models shared by the cache, the remote gateway and the engine.

pub mod event;

pub use self::event::*;
