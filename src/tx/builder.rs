//! Capacity funding shared by every transaction the relayer builds
//!
//! Builders describe the value-bearing part of a transaction as a [`Draft`];
//! the [`Funder`] then adds plain capacity cells first-fit until inputs cover
//! outputs plus fee, and returns the remainder as change when it is worth an
//! output of its own. Every returned transaction satisfies
//! `Σ outputs + fee == Σ inputs`.

use crate::chain::Collector;
use crate::error::{RelayerError, RelayerResult};
use crate::types::{Bytes, Cell, CellDep, CellOutput, Script, UnsignedTx};

use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    /// Flat fee per transaction
    pub fee: u64,
    /// Smaller change is left to the fee instead of creating an output
    pub min_change_capacity: u64,
}

/// Outputs and pre-selected inputs of a transaction under construction
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub cell_deps: Vec<CellDep>,
    pub inputs: Vec<Cell>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Bytes>,
}

impl Draft {
    pub fn new(cell_deps: Vec<CellDep>) -> Self {
        Self {
            cell_deps,
            ..Self::default()
        }
    }

    pub fn add_input(&mut self, cell: Cell) {
        self.inputs.push(cell);
    }

    pub fn add_output(&mut self, output: CellOutput, data: impl Into<Bytes>) {
        self.outputs.push(output);
        self.outputs_data.push(data.into());
    }
}

pub struct Funder {
    collector: Arc<dyn Collector>,
    policy: FeePolicy,
}

impl Funder {
    pub fn new(collector: Arc<dyn Collector>, policy: FeePolicy) -> Self {
        Self { collector, policy }
    }

    pub fn collector(&self) -> &Arc<dyn Collector> {
        &self.collector
    }

    /// Fund `draft` from plain cells of `owner` and balance it
    pub async fn complete(&self, draft: Draft, owner: &Script) -> RelayerResult<UnsignedTx> {
        let Draft {
            cell_deps,
            mut inputs,
            mut outputs,
            mut outputs_data,
        } = draft;

        let outputs_total: u128 = outputs.iter().map(|o| o.capacity as u128).sum();
        let required = outputs_total + self.policy.fee as u128;
        let mut available: u128 = inputs.iter().map(|c| c.output.capacity as u128).sum();

        if available < required {
            let missing = u64::try_from(required - available).map_err(|_| {
                RelayerError::InsufficientFunds {
                    required,
                    available,
                }
            })?;
            let candidates = self
                .collector
                .cells_by_owner_and_min_value(owner, missing)
                .await?;

            for cell in candidates {
                if available >= required {
                    break;
                }
                let usable = cell.is_plain()
                    && cell.output.lock == *owner
                    && !inputs.iter().any(|c| c.out_point == cell.out_point);
                if !usable {
                    continue;
                }
                available += cell.output.capacity as u128;
                inputs.push(cell);
            }

            if available < required {
                return Err(RelayerError::InsufficientFunds {
                    required,
                    available,
                });
            }
        }

        let change = available - required;
        let mut fee = self.policy.fee as u128;
        if change > 0 && change >= self.policy.min_change_capacity as u128 {
            let capacity = u64::try_from(change)
                .map_err(|_| RelayerError::Internal(format!("change {change} overflows u64")))?;
            outputs.push(CellOutput::new(capacity, owner.clone(), None));
            outputs_data.push(Bytes::default());
        } else {
            fee += change;
        }

        let tx = UnsignedTx {
            cell_deps,
            inputs,
            outputs,
            outputs_data,
            fee: u64::try_from(fee)
                .map_err(|_| RelayerError::Internal(format!("fee {fee} overflows u64")))?,
        };
        if !tx.is_balanced() {
            return Err(RelayerError::Internal(format!(
                "unbalanced transaction: in {} out {} fee {}",
                tx.input_capacity(),
                tx.output_capacity(),
                tx.fee
            )));
        }

        debug!(
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = tx.fee,
            "Funded transaction"
        );
        Ok(tx)
    }
}
