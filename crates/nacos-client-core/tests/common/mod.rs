//! Shared in-process registry double for the end-to-end tests.

pub mod backend;
