//! replyflow: conversation automation core for small-business messaging.

pub mod business;
pub mod channels;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod followup;
pub mod http;
pub mod knowledge;
pub mod leads;
pub mod pipeline;
pub mod reply;
pub mod store;
