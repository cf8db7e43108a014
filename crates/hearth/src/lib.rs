//! `hearth`: a persistent multi-user text-world engine.
//!
//! Durable state lives in a document store ([`hearth_store`]); this crate
//! hydrates it into entity behaviors, runs the fixed-tick world tasks that
//! drain per-entity work queues, and routes each connection's input through
//! its own stack of parsers.

pub mod commands;
pub mod config;
pub mod context;
pub mod entities;
pub mod hub;
pub mod net;
pub mod parsers;
pub mod queries;
pub mod scheduler;
pub mod session;
pub mod tasks;

#[cfg(test)]
mod testutil;
