//! Capability grants: who may do what in which group.
//!
//! A grant row is never physically deleted. Revocation sets `is_active` to
//! `false` and stamps `deleted_at`, so the table doubles as an audit log.

use std::fmt;

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::{EngineError, ResultEngine};

/// A single capability a user can hold on a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Create,
    Edit,
    Delete,
}

impl Capability {
    /// The full set handed to a group owner on creation.
    pub const ALL: [Capability; 4] = [Self::View, Self::Create, Self::Edit, Self::Delete];

    /// Returns the canonical string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Capability {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            other => Err(EngineError::Invalid(format!("unknown capability: {other}"))),
        }
    }
}

/// One capability held by one user on one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilityGrant {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub capability: Capability,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<Model> for CapabilityGrant {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        Ok(Self {
            id: model.id,
            group_id: model.group_id,
            user_id: model.user_id,
            capability: Capability::try_from(model.capability.as_str())?,
            active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "group_user_permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub capability: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Groups,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_round_trips_through_storage_string() {
        for capability in Capability::ALL {
            assert_eq!(Capability::try_from(capability.as_str()), Ok(capability));
        }
    }

    #[test]
    #[should_panic(expected = "Invalid(\"unknown capability: admin\")")]
    fn rejects_unknown_capability() {
        Capability::try_from("admin").unwrap();
    }
}
