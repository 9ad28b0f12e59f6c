use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use sea_orm::{ActiveValue, QueryFilter, QueryOrder, prelude::*, sea_query::Expr};
use serde::Serialize;

use crate::{Bill, Capability, EngineError, Group, ResultEngine, SettlementTransfer, groups};

use super::{Engine, normalize_optional_text, normalize_required_name, with_tx};

/// A group as seen by one of its members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserGroup {
    pub group: Group,
    pub capabilities: BTreeSet<Capability>,
}

/// Everything a member with `View` sees about a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupDetails {
    pub group: Group,
    /// Users holding any active capability on the group, ascending.
    pub members: Vec<i64>,
    pub bills: Vec<Bill>,
    /// The active settlement generation, empty if the group was never settled.
    pub transfers: Vec<SettlementTransfer>,
}

impl Engine {
    /// Creates a group and grants its owner every capability.
    ///
    /// Both writes share one transaction: if the owner grant fails the group
    /// is not created either.
    #[tracing::instrument(skip(self))]
    pub async fn create_group(
        &self,
        owner_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> ResultEngine<Group> {
        let name = normalize_required_name(name, "group")?;
        let description = normalize_optional_text(description);

        with_tx!(self, |db_tx| {
            let now = Utc::now();
            let group = groups::ActiveModel {
                id: ActiveValue::NotSet,
                owner_id: ActiveValue::Set(owner_id),
                name: ActiveValue::Set(name),
                description: ActiveValue::Set(description),
                created_by: ActiveValue::Set(owner_id),
                updated_by: ActiveValue::Set(owner_id),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
                deleted_at: ActiveValue::Set(None),
            }
            .insert(&db_tx)
            .await
            .map_err(EngineError::upstream("failed to create group"))?;

            self.grant_in(&db_tx, owner_id, group.id, &Capability::ALL)
                .await?;

            tracing::info!(group_id = group.id, "group created");
            Ok(Group::from(group))
        })
    }

    /// Renames a group and replaces its description (requires `Edit`).
    #[tracing::instrument(skip(self))]
    pub async fn update_group(
        &self,
        user_id: i64,
        group_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> ResultEngine<Group> {
        let name = normalize_required_name(name, "group")?;
        let description = normalize_optional_text(description);

        with_tx!(self, |db_tx| {
            let model = self
                .require_capability(&db_tx, user_id, group_id, Capability::Edit)
                .await?;

            let mut active: groups::ActiveModel = model.into();
            active.name = ActiveValue::Set(name);
            active.description = ActiveValue::Set(description);
            active.updated_by = ActiveValue::Set(user_id);
            active.updated_at = ActiveValue::Set(Utc::now());
            let updated = active
                .update(&db_tx)
                .await
                .map_err(EngineError::upstream("failed to update group"))?;

            Ok(Group::from(updated))
        })
    }

    /// Soft-deletes a group and revokes every grant on it (requires `Delete`).
    ///
    /// The two cascade steps are launched together and joined; the first
    /// failure is returned and, since they share a transaction, neither step
    /// is kept.
    #[tracing::instrument(skip(self))]
    pub async fn remove_group(&self, user_id: i64, group_id: i64) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Delete)
                .await?;

            let now = Utc::now();
            let soft_delete = async {
                groups::Entity::update_many()
                    .col_expr(groups::Column::DeletedAt, Expr::value(now))
                    .col_expr(groups::Column::UpdatedAt, Expr::value(now))
                    .col_expr(groups::Column::UpdatedBy, Expr::value(user_id))
                    .filter(groups::Column::Id.eq(group_id))
                    .exec(&db_tx)
                    .await
                    .map_err(EngineError::upstream("failed to delete group"))
            };
            let revoke = self.revoke_all_for_group_in(&db_tx, group_id, now);
            tokio::try_join!(soft_delete, revoke)?;

            tracing::info!("group removed");
            Ok(())
        })
    }

    /// Adds `target_user_id` to a group with `View` only.
    ///
    /// Only the owner may do this, whatever capabilities others hold. Fails
    /// with a conflict if the target already holds any capability there.
    #[tracing::instrument(skip(self))]
    pub async fn assign_user_to_group(
        &self,
        acting_user_id: i64,
        target_user_id: i64,
        group_id: i64,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_group_owner(&db_tx, acting_user_id, group_id)
                .await?;

            let held = self
                .active_capabilities_in(&db_tx, target_user_id, group_id)
                .await?;
            if !held.is_empty() {
                tracing::warn!("user already assigned");
                return Err(EngineError::Conflict(
                    "user already assigned to group".to_string(),
                ));
            }

            self.grant_in(&db_tx, target_user_id, group_id, &[Capability::View])
                .await
        })
    }

    /// Lists the groups `user_id` holds any capability in, with the
    /// capabilities held on each.
    #[tracing::instrument(skip(self))]
    pub async fn list_user_groups(&self, user_id: i64) -> ResultEngine<Vec<UserGroup>> {
        with_tx!(self, |db_tx| {
            let mut held: BTreeMap<i64, BTreeSet<Capability>> = BTreeMap::new();
            for grant in self.user_grants_in(&db_tx, user_id).await? {
                held.entry(grant.group_id)
                    .or_default()
                    .insert(Capability::try_from(grant.capability.as_str())?);
            }
            if held.is_empty() {
                return Ok(Vec::new());
            }

            let models = groups::Entity::find()
                .filter(groups::Column::Id.is_in(held.keys().copied()))
                .filter(groups::Column::DeletedAt.is_null())
                .order_by_asc(groups::Column::Id)
                .all(&db_tx)
                .await
                .map_err(EngineError::upstream("unable to fetch user groups"))?;

            Ok(models
                .into_iter()
                .map(|model| UserGroup {
                    capabilities: held.remove(&model.id).unwrap_or_default(),
                    group: Group::from(model),
                })
                .collect())
        })
    }

    /// Returns the group with its members, bills and active transfers
    /// (requires `View`).
    #[tracing::instrument(skip(self))]
    pub async fn group_details(&self, user_id: i64, group_id: i64) -> ResultEngine<GroupDetails> {
        with_tx!(self, |db_tx| {
            let group = self
                .require_capability(&db_tx, user_id, group_id, Capability::View)
                .await?;

            let members = self.group_member_ids_in(&db_tx, group_id).await?;
            let bills = self.bills_for_group_in(&db_tx, group_id).await?;
            let transfers = self.active_transfers_in(&db_tx, group_id).await?;

            Ok(GroupDetails {
                group: Group::from(group),
                members,
                bills: bills.into_iter().map(Bill::from).collect(),
                transfers: transfers
                    .into_iter()
                    .map(SettlementTransfer::from)
                    .collect(),
            })
        })
    }
}
