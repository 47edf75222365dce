//! # burrow-core
//!
//! Low-level Linux isolation primitives for the Burrow runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: PID and UTS (hostname) isolation.
//! - **Filesystem**: root change via `chroot(2)`.
//! - **Isolation**: a declarative launch configuration that the runtime
//!   turns into the child-side setup run between `fork` and `exec`.
//!
//! Functions that run in a forked child are documented as such; they do
//! not allocate or log.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod isolation;
pub mod namespace;
