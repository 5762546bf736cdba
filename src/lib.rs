//! sessionlog - append-only, multi-writer chat session logs
//!
//! Writers in independent processes append length-prefixed frames to one
//! segment file per session, seal segments by atomic rename, and hand sealed
//! segments to a queue. Readers decode segments without locking and stop
//! cleanly at a torn tail.

pub mod append_log;
pub mod cli;
pub mod config;
pub mod observability;
