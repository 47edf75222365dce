//! Filesystem root switching for container isolation.

pub mod chroot;
