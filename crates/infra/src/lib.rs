//! Infrastructure layer: storage, credit ledger, model provider client,
//! outbound channel, the generation pipeline and configuration.

pub mod channel;
pub mod config;
pub mod ledger;
pub mod pipeline;
pub mod provider;
pub mod store;

#[cfg(test)]
mod testing;
