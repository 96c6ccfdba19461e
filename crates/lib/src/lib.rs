//! Salesbot core library: WhatsApp gateway sessions, the sales agent dispatch loop, and the
//! backend health monitor, used by the CLI.

pub mod agent;
pub mod backend;
pub mod channels;
pub mod config;
pub mod health;
pub mod schedule;
