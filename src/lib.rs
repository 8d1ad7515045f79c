//! CKB bridge relayer
//!
//! Watches BTC, ETH, TRON and EOS custody accounts for deposits and mints
//! wrapped sUDT tokens on CKB, then watches CKB for burns of those tokens
//! and pays the origin-chain recipients back out of custody. Every outgoing
//! transaction is co-signed by an M-of-N committee of relayers.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod crypto;
pub mod error;
pub mod events;
pub mod metrics;
pub mod multisig;
pub mod state;
pub mod tasks;
pub mod tx;
pub mod types;

#[cfg(test)]
pub mod testing;
