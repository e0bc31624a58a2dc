//! Task lists with optimistic updates and local team membership.

pub mod auth;
pub mod config;
pub mod remote;
pub mod tasks;
pub mod teams;
