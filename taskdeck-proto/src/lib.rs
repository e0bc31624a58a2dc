//! Shared wire and domain definitions for Taskdeck.

pub mod auth;
pub mod codec;
pub mod id;
pub mod task;
pub mod team;
