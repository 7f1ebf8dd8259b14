//! Shared utilities.
//!
//! Common utilities used across the crate: fingerprint hashing and the boxed
//! future alias used at trait-object seams.

use std::future::Future;
use std::pin::Pin;

pub mod hash;

/// A heap-allocated, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
