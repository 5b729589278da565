//! Discord connections for the two roles the binary can play.

pub mod discord;
pub mod watcher;
