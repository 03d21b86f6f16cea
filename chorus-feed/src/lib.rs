//! The client-side engine of the feed: pagination, comment threads,
//! optimistic likes and posting, all on top of injected collaborators.

pub mod config;
pub mod coordinator;
pub mod ledger;
pub mod media;
pub mod mutation;
pub mod scroll;
pub mod search;
pub mod service;
pub mod store;
pub mod thread;

#[cfg(test)]
mod fake;
