use sea_orm::{DatabaseTransaction, QueryFilter, prelude::*};

use crate::{Capability, EngineError, ResultEngine, groups};

use super::{Engine, with_tx};

/// The one message every denial uses, so a caller cannot tell a missing group
/// from a missing capability.
const ACCESS_DENIED: &str = "access to group denied";

fn access_denied() -> EngineError {
    EngineError::Forbidden(ACCESS_DENIED.to_string())
}

impl Engine {
    /// The authorization gate for every group-scoped operation.
    ///
    /// Succeeds iff the group exists (not soft-deleted) and `user_id` holds
    /// `capability` on it. Both failure causes yield the same
    /// [`EngineError::Forbidden`].
    #[tracing::instrument(skip(self))]
    pub async fn validate_user_group_permission(
        &self,
        user_id: i64,
        group_id: i64,
        capability: Capability,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, capability)
                .await
                .map(|_| ())
        })
    }

    pub(super) async fn find_group(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
    ) -> ResultEngine<Option<groups::Model>> {
        groups::Entity::find_by_id(group_id)
            .filter(groups::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(EngineError::upstream("failed to retrieve group"))
    }

    pub(super) async fn require_capability(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
        group_id: i64,
        capability: Capability,
    ) -> ResultEngine<groups::Model> {
        let Some(group) = self.find_group(db, group_id).await? else {
            tracing::warn!(user_id, group_id, %capability, "group not found");
            return Err(access_denied());
        };
        if !self
            .has_capability_in(db, user_id, group_id, capability)
            .await?
        {
            tracing::warn!(user_id, group_id, %capability, "capability missing");
            return Err(access_denied());
        }
        Ok(group)
    }

    pub(super) async fn require_group_owner(
        &self,
        db: &DatabaseTransaction,
        user_id: i64,
        group_id: i64,
    ) -> ResultEngine<groups::Model> {
        let Some(group) = self.find_group(db, group_id).await? else {
            tracing::warn!(user_id, group_id, "group not found");
            return Err(access_denied());
        };
        if group.owner_id != user_id {
            tracing::warn!(user_id, group_id, "caller is not the group owner");
            return Err(access_denied());
        }
        Ok(group)
    }
}
