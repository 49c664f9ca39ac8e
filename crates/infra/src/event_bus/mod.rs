//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `jobboard-events` as pure mechanics.
//! This module provides the Redis-backed implementation.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConfig, RedisStreamsError, RedisStreamsEventBus};
