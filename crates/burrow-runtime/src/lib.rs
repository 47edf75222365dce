//! Run pipeline for the Burrow runtime.
//!
//! Drives one container run from image reference to exit code:
//! assemble the root filesystem, stage the executable, launch the command
//! inside new namespaces, and remove the root on every exit path.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod process;
pub mod state;
