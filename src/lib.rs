//! This is the library of the Bitbucket Server bridge.
//!
//! It keeps the webhooks of a Bitbucket Server repository in sync with what the CI
//! orchestrator needs, and maintains a local view of open pull requests fed by webhook
//! deliveries and periodic refreshes.
pub mod bitbucket;
pub mod config;
pub mod hooks;
pub mod pulls;
pub mod utils;

#[cfg(test)]
mod tests;
