//! Process-level helpers for applications embedding the store.

pub mod bootstrap;
