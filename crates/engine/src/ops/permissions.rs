//! Capability grants: the single source of truth for "who may do what in
//! which group". Grant rows are only ever written from this module.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder,
    prelude::*,
    sea_query::{Expr, OnConflict},
};

use crate::{
    Capability, CapabilityGrant, EngineError, ResultEngine,
    grants::{self, Column},
};

use super::{Engine, with_tx};

impl Engine {
    /// Grants `capabilities` to `user_id` on `group_id`.
    ///
    /// Capabilities the user already holds are skipped, so granting twice is
    /// a no-op success, also when two grants race.
    #[tracing::instrument(skip(self))]
    pub async fn grant_capabilities(
        &self,
        user_id: i64,
        group_id: i64,
        capabilities: &[Capability],
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.grant_in(&db_tx, user_id, group_id, capabilities)
                .await
        })
    }

    /// Returns `true` iff an active grant exists for the exact
    /// `(user, group, capability)` triple.
    ///
    /// A missing row is a plain `false`, not an error: "never granted" and
    /// "revoked" look the same to callers.
    #[tracing::instrument(skip(self))]
    pub async fn has_capability(
        &self,
        user_id: i64,
        group_id: i64,
        capability: Capability,
    ) -> ResultEngine<bool> {
        with_tx!(self, |db_tx| {
            self.has_capability_in(&db_tx, user_id, group_id, capability)
                .await
        })
    }

    /// Lists every active grant held by `user_id`, across all groups.
    #[tracing::instrument(skip(self))]
    pub async fn list_user_grants(&self, user_id: i64) -> ResultEngine<Vec<CapabilityGrant>> {
        with_tx!(self, |db_tx| {
            let models = self.user_grants_in(&db_tx, user_id).await?;
            models
                .into_iter()
                .map(CapabilityGrant::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Deactivates every grant of a group, whatever the user or capability.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_all_for_group(&self, group_id: i64) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.revoke_all_for_group_in(&db_tx, group_id, Utc::now())
                .await
        })
    }

    pub(super) async fn grant_in(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
        group_id: i64,
        capabilities: &[Capability],
    ) -> ResultEngine<()> {
        let held = self.active_capabilities_in(db, user_id, group_id).await?;
        let now = Utc::now();

        let missing: Vec<grants::ActiveModel> = capabilities
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|capability| !held.contains(capability))
            .map(|capability| grants::ActiveModel {
                id: ActiveValue::NotSet,
                group_id: ActiveValue::Set(group_id),
                user_id: ActiveValue::Set(user_id),
                capability: ActiveValue::Set(capability.as_str().to_string()),
                is_active: ActiveValue::Set(true),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
                deleted_at: ActiveValue::Set(None),
            })
            .collect();

        if missing.is_empty() {
            tracing::debug!("capabilities already held");
            return Ok(());
        }

        // A concurrent grant of the same capability may land between the read
        // and the insert; the active-grant index then turns the row into a no-op.
        let granted = grants::Entity::insert_many(missing)
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .exec_without_returning(db)
            .await
            .map_err(EngineError::upstream("failed to update permissions"))?;
        tracing::info!(granted, "capabilities granted");
        Ok(())
    }

    pub(super) async fn has_capability_in(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
        group_id: i64,
        capability: Capability,
    ) -> ResultEngine<bool> {
        let found = grants::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::GroupId.eq(group_id))
            .filter(Column::Capability.eq(capability.as_str()))
            .filter(Column::IsActive.eq(true))
            .filter(Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(EngineError::upstream("permission check failed"))?
            .is_some();
        if !found {
            tracing::debug!(user_id, group_id, %capability, "no active grant");
        }
        Ok(found)
    }

    pub(super) async fn active_capabilities_in(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
        group_id: i64,
    ) -> ResultEngine<BTreeSet<Capability>> {
        let models = grants::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::GroupId.eq(group_id))
            .filter(Column::IsActive.eq(true))
            .filter(Column::DeletedAt.is_null())
            .all(db)
            .await
            .map_err(EngineError::upstream("permission check failed"))?;
        models
            .iter()
            .map(|model| Capability::try_from(model.capability.as_str()))
            .collect()
    }

    pub(super) async fn user_grants_in(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
    ) -> ResultEngine<Vec<grants::Model>> {
        grants::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::IsActive.eq(true))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::GroupId)
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(EngineError::upstream("failed to fetch group permissions"))
    }

    /// Distinct ids of users holding any active grant on the group.
    pub(super) async fn group_member_ids_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
    ) -> ResultEngine<Vec<i64>> {
        let models = grants::Entity::find()
            .filter(Column::GroupId.eq(group_id))
            .filter(Column::IsActive.eq(true))
            .filter(Column::DeletedAt.is_null())
            .all(db)
            .await
            .map_err(EngineError::upstream("failed to fetch group permissions"))?;
        let members: BTreeSet<i64> = models.into_iter().map(|model| model.user_id).collect();
        Ok(members.into_iter().collect())
    }

    pub(super) async fn revoke_all_for_group_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
        now: DateTime<Utc>,
    ) -> ResultEngine<()> {
        let result = grants::Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(Column::DeletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::GroupId.eq(group_id))
            .filter(Column::DeletedAt.is_null())
            .exec(db)
            .await
            .map_err(EngineError::upstream("failed to remove permissions from group"))?;
        tracing::info!(revoked = result.rows_affected, "group permissions revoked");
        Ok(())
    }
}
