//! Persisted settlement: computing, clearing and recomputing the active
//! transfer generation of a group.
//!
//! Every write here runs under the group's settlement lock, so the
//! "already settled" check and the insert it guards cannot interleave with
//! another computation for the same group. Callers are authorized before the
//! lock is taken and again inside the transaction, so a denied caller never
//! waits behind a running computation.

use chrono::Utc;
use sea_orm::{DatabaseTransaction, QueryFilter, QueryOrder, prelude::*, sea_query::Expr};

use crate::{
    Capability, EngineError, Money, ResultEngine, SettlementTransfer, bill_splits, member_balances,
    settle,
};

use super::{Engine, with_tx};

impl Engine {
    /// Splits the group's bills evenly and stores the transfers that settle
    /// them (requires `Create`).
    ///
    /// Fails with a conflict when an active generation already exists and with
    /// not-found when the group has no bills. A perfectly balanced group
    /// yields an empty list and stores nothing, so it stays unsettled and a
    /// later call computes it again.
    #[tracing::instrument(skip(self))]
    pub async fn compute_settlement(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> ResultEngine<Vec<SettlementTransfer>> {
        self.validate_user_group_permission(user_id, group_id, Capability::Create)
            .await?;
        let _guard = self.settlement_locks.acquire(group_id).await;
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Create)
                .await?;
            self.compute_in(&db_tx, group_id).await
        })
    }

    /// Replaces the active generation with a fresh one (requires `Create`).
    ///
    /// Clearing and recomputing share a transaction: if the computation fails
    /// the previous generation stays active.
    #[tracing::instrument(skip(self))]
    pub async fn recalculate_settlement(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> ResultEngine<Vec<SettlementTransfer>> {
        self.validate_user_group_permission(user_id, group_id, Capability::Create)
            .await?;
        let _guard = self.settlement_locks.acquire(group_id).await;
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Create)
                .await?;
            self.clear_in(&db_tx, group_id).await?;
            self.compute_in(&db_tx, group_id).await
        })
    }

    /// Soft-deletes the group's active transfers. Clearing an unsettled group
    /// succeeds and changes nothing.
    ///
    /// No permission check happens here; callers gate it themselves.
    #[tracing::instrument(skip(self))]
    pub async fn clear_settlement(&self, group_id: i64) -> ResultEngine<()> {
        let _guard = self.settlement_locks.acquire(group_id).await;
        with_tx!(self, |db_tx| { self.clear_in(&db_tx, group_id).await })
    }

    /// Lists the active transfers of a group (requires `View`).
    #[tracing::instrument(skip(self))]
    pub async fn list_transfers(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> ResultEngine<Vec<SettlementTransfer>> {
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::View)
                .await?;
            let models = self.active_transfers_in(&db_tx, group_id).await?;
            Ok(models.into_iter().map(SettlementTransfer::from).collect())
        })
    }

    async fn compute_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
    ) -> ResultEngine<Vec<SettlementTransfer>> {
        if !self.active_transfers_in(db, group_id).await?.is_empty() {
            tracing::warn!("group already settled");
            return Err(EngineError::Conflict("group already settled".to_string()));
        }

        let bills = self.bills_for_group_in(db, group_id).await?;
        if bills.is_empty() {
            return Err(EngineError::NotFound(
                "group has no bills to split".to_string(),
            ));
        }

        let balances = member_balances(
            bills
                .iter()
                .map(|bill| (bill.user_id, Money::new(bill.paid_amount_minor))),
        )?;
        let settlements = settle(&balances);
        if settlements.is_empty() {
            tracing::info!(members = balances.len(), "group already balanced");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let rows: Vec<bill_splits::ActiveModel> = settlements
            .iter()
            .map(|settlement| bill_splits::ActiveModel::from_settlement(group_id, settlement, now))
            .collect();
        bill_splits::Entity::insert_many(rows)
            .exec(db)
            .await
            .map_err(EngineError::upstream("failed to store settlement"))?;

        let stored = self.active_transfers_in(db, group_id).await?;
        tracing::info!(
            members = balances.len(),
            transfers = stored.len(),
            "settlement computed"
        );
        Ok(stored.into_iter().map(SettlementTransfer::from).collect())
    }

    async fn clear_in(&self, db: &DatabaseTransaction, group_id: i64) -> ResultEngine<()> {
        let now = Utc::now();
        let result = bill_splits::Entity::update_many()
            .col_expr(bill_splits::Column::DeletedAt, Expr::value(now))
            .col_expr(bill_splits::Column::UpdatedAt, Expr::value(now))
            .filter(bill_splits::Column::GroupId.eq(group_id))
            .filter(bill_splits::Column::DeletedAt.is_null())
            .exec(db)
            .await
            .map_err(EngineError::upstream("failed to clear settlement"))?;
        tracing::info!(cleared = result.rows_affected, "settlement cleared");
        Ok(())
    }

    pub(super) async fn active_transfers_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
    ) -> ResultEngine<Vec<bill_splits::Model>> {
        bill_splits::Entity::find()
            .filter(bill_splits::Column::GroupId.eq(group_id))
            .filter(bill_splits::Column::DeletedAt.is_null())
            .order_by_asc(bill_splits::Column::Id)
            .all(db)
            .await
            .map_err(EngineError::upstream("failed to fetch settlement"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    use super::*;

    async fn engine() -> Engine {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Engine::builder().database(db).build().await.unwrap()
    }

    #[tokio::test]
    async fn denied_callers_do_not_wait_for_the_group_lock() {
        let engine = engine().await;
        let group = engine.create_group(1, "Trip", None).await.unwrap();
        let _held = engine.settlement_locks.acquire(group.id).await;

        let outsider = tokio::time::timeout(
            Duration::from_millis(500),
            engine.compute_settlement(99, group.id),
        )
        .await
        .expect("denied compute must not queue behind the lock");
        assert_eq!(outsider.unwrap_err().kind(), crate::ErrorKind::Forbidden);

        let missing = tokio::time::timeout(
            Duration::from_millis(500),
            engine.recalculate_settlement(1, group.id + 1),
        )
        .await
        .expect("recalculation of a missing group must not queue behind the lock");
        assert_eq!(missing.unwrap_err().kind(), crate::ErrorKind::Forbidden);

        let owner = tokio::time::timeout(
            Duration::from_millis(50),
            engine.compute_settlement(1, group.id),
        )
        .await;
        assert!(owner.is_err(), "authorized compute waits for the lock");
    }
}
