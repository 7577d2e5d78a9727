//! Inventory ledger: authoritative stock counters, one per product.
//!
//! `reserve` is an atomic check-and-decrement: the read, the comparison and
//! the write all happen under the map entry's write guard, so two racing
//! reservations for the last unit serialize and exactly one succeeds.
//! Locking is per product; there is no global inventory lock.

use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Stock counters for one product. `on_hand` is the sellable stock;
/// `reserved` tracks decrements that are still reversible, for release
/// clamping and audit.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockLevel {
    pub on_hand: i32,
    pub reserved: i32,
}

pub struct InventoryService {
    levels: DashMap<Uuid, StockLevel>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(event_sender: EventSender) -> Self {
        Self {
            levels: DashMap::new(),
            event_sender,
        }
    }

    /// Seeds or resets the sellable stock for a product. Outstanding
    /// reservations are preserved.
    #[instrument(skip(self))]
    pub fn set_level(&self, product_id: Uuid, on_hand: i32) {
        let mut entry = self.levels.entry(product_id).or_default();
        entry.on_hand = on_hand;
    }

    pub fn level(&self, product_id: Uuid) -> StockLevel {
        self.levels
            .get(&product_id)
            .map(|l| *l)
            .unwrap_or_default()
    }

    /// Atomically reserves `quantity` units, decrementing sellable stock.
    /// Fails with `InsufficientStock` without any partial effect; the
    /// caller decides whether to surface or retry, never this ledger.
    #[instrument(skip(self))]
    pub async fn reserve(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity {
                product_id,
                quantity,
            });
        }
        {
            let mut entry = self.levels.entry(product_id).or_default();
            if entry.on_hand < quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: entry.on_hand,
                });
            }
            entry.on_hand -= quantity;
            entry.reserved += quantity;
        }
        self.event_sender
            .send(Event::InventoryReserved {
                product_id,
                quantity,
            })
            .await;
        Ok(())
    }

    /// Returns reserved units to the sellable pool. Clamped to the
    /// outstanding reservation, so replayed releases are no-ops.
    #[instrument(skip(self))]
    pub async fn release(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let freed = {
            match self.levels.get_mut(&product_id) {
                Some(mut entry) => {
                    let freed = quantity.max(0).min(entry.reserved);
                    entry.reserved -= freed;
                    entry.on_hand += freed;
                    freed
                }
                None => 0,
            }
        };
        if freed > 0 {
            self.event_sender
                .send(Event::InventoryReleased {
                    product_id,
                    quantity: freed,
                })
                .await;
        } else {
            debug!(%product_id, quantity, "release with nothing outstanding; no-op");
        }
        Ok(())
    }

    /// Marks a reservation permanent. Stock was already decremented at
    /// reserve time; this only retires the reversible portion.
    #[instrument(skip(self))]
    pub async fn commit(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let committed = {
            match self.levels.get_mut(&product_id) {
                Some(mut entry) => {
                    let committed = quantity.max(0).min(entry.reserved);
                    entry.reserved -= committed;
                    committed
                }
                None => 0,
            }
        };
        if committed > 0 {
            self.event_sender
                .send(Event::InventoryCommitted {
                    product_id,
                    quantity: committed,
                })
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn service() -> InventoryService {
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        InventoryService::new(EventSender::new(tx))
    }

    #[tokio::test]
    async fn reserve_decrements_and_release_restores() {
        let inv = service();
        let p = Uuid::new_v4();
        inv.set_level(p, 5);

        inv.reserve(p, 3).await.unwrap();
        assert_eq!(inv.level(p).on_hand, 2);
        assert_eq!(inv.level(p).reserved, 3);

        inv.release(p, 3).await.unwrap();
        assert_eq!(inv.level(p).on_hand, 5);
        assert_eq!(inv.level(p).reserved, 0);
    }

    #[tokio::test]
    async fn reserve_fails_without_partial_effect() {
        let inv = service();
        let p = Uuid::new_v4();
        inv.set_level(p, 2);

        let err = inv.reserve(p, 3).await.unwrap_err();
        assert_matches!(
            err,
            ServiceError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        );
        assert_eq!(inv.level(p).on_hand, 2);
        assert_eq!(inv.level(p).reserved, 0);
    }

    #[tokio::test]
    async fn release_is_clamped_to_outstanding_reservation() {
        let inv = service();
        let p = Uuid::new_v4();
        inv.set_level(p, 5);
        inv.reserve(p, 2).await.unwrap();

        // Double release must not mint stock.
        inv.release(p, 2).await.unwrap();
        inv.release(p, 2).await.unwrap();
        assert_eq!(inv.level(p).on_hand, 5);
        assert_eq!(inv.level(p).reserved, 0);
    }

    #[tokio::test]
    async fn commit_retires_the_reservation_without_touching_stock() {
        let inv = service();
        let p = Uuid::new_v4();
        inv.set_level(p, 5);
        inv.reserve(p, 2).await.unwrap();

        inv.commit(p, 2).await.unwrap();
        assert_eq!(inv.level(p).on_hand, 3);
        assert_eq!(inv.level(p).reserved, 0);

        // A release after commit has nothing left to free.
        inv.release(p, 2).await.unwrap();
        assert_eq!(inv.level(p).on_hand, 3);
    }

    #[tokio::test]
    async fn zero_or_negative_quantity_is_rejected() {
        let inv = service();
        let p = Uuid::new_v4();
        inv.set_level(p, 5);
        assert_matches!(
            inv.reserve(p, 0).await,
            Err(ServiceError::InvalidQuantity { .. })
        );
        assert_matches!(
            inv.reserve(p, -1).await,
            Err(ServiceError::InvalidQuantity { .. })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_oversell() {
        let inv = std::sync::Arc::new(service());
        let p = Uuid::new_v4();
        inv.set_level(p, 10);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let inv = inv.clone();
            tasks.push(tokio::spawn(async move {
                inv.reserve(p, 1).await.is_ok()
            }));
        }
        let mut successes = 0;
        for t in tasks {
            if t.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 10);
        assert_eq!(inv.level(p).on_hand, 0);
        assert_eq!(inv.level(p).reserved, 10);
    }
}
