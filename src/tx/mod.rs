//! Transaction construction and submission

mod builder;
mod ckb;
mod sender;
mod unlock;

pub use builder::{Draft, FeePolicy, Funder};
pub use ckb::{BurnRequest, CkbTxBuilder, CkbTxConfig};
pub use sender::Submitter;
pub use unlock::{UnlockTxBuilder, UnlockTxConfig};
