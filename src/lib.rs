//! Hotel reservation autoresponder.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
