pub mod config;
pub mod filter;
pub mod google;
pub mod instagram;
pub mod ledger;
pub mod model;
pub mod publisher;
pub mod server;
pub mod sync;
pub mod webhook;
