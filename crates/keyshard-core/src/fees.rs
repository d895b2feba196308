//! Fee collection
//!
//! Store fees are moved by an external payment mechanism. The registry only
//! asks it to forward an amount from the payer to the configured collector,
//! and to refund that amount when the store it paid for never lands.

use crate::types::Address;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// External payment mechanism
#[async_trait]
pub trait FeeCollector: Send + Sync + Debug {
    /// Move `amount` from `from` to `to`
    async fn forward(&self, from: &Address, to: &Address, amount: u128) -> Result<()>;

    /// Return `amount` previously forwarded from `payer` to `collector`
    async fn refund(&self, collector: &Address, payer: &Address, amount: u128) -> Result<()>;
}

/// Direction of a recorded transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Fee,
    Refund,
}

/// A completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: u128,
    pub kind: TransferKind,
    pub at: DateTime<Utc>,
}

/// Collector that only records transfers
#[derive(Debug, Default)]
pub struct MemoryFeeCollector {
    transfers: Mutex<Vec<FeeTransfer>>,
}

impl MemoryFeeCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded transfers
    pub fn transfers(&self) -> Vec<FeeTransfer> {
        self.transfers.lock().clone()
    }

    /// Net amount `collector` holds after refunds
    pub fn total_received(&self, collector: &Address) -> u128 {
        self.transfers
            .lock()
            .iter()
            .fold(0u128, |total, t| match t.kind {
                TransferKind::Fee if t.to == *collector => total.saturating_add(t.amount),
                TransferKind::Refund if t.from == *collector => total.saturating_sub(t.amount),
                _ => total,
            })
    }

    fn record(&self, from: &Address, to: &Address, amount: u128, kind: TransferKind) {
        self.transfers.lock().push(FeeTransfer {
            from: *from,
            to: *to,
            amount,
            kind,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl FeeCollector for MemoryFeeCollector {
    async fn forward(&self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        self.record(from, to, amount, TransferKind::Fee);
        Ok(())
    }

    async fn refund(&self, collector: &Address, payer: &Address, amount: u128) -> Result<()> {
        self.record(collector, payer, amount, TransferKind::Refund);
        Ok(())
    }
}
