//! Settlement transfers ("bill splits").
//!
//! Rows are derived data: they can always be rebuilt from the group's bills.
//! At most one generation is active per group; a recomputation soft-deletes
//! the previous generation first.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Serialize;

use crate::{Money, settlement::Settlement};

/// A transfer `from_user_id -> to_user_id` that settles part of a group's
/// imbalance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettlementTransfer {
    pub id: i64,
    pub group_id: i64,
    /// Debtor.
    pub from_user_id: i64,
    /// Creditor.
    pub to_user_id: i64,
    pub amount_due: Money,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Model> for SettlementTransfer {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            group_id: model.group_id,
            from_user_id: model.from_user_id,
            to_user_id: model.to_user_id,
            amount_due: Money::new(model.amount_due_minor),
            is_paid: model.is_paid,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "bill_splits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub amount_due_minor: i64,
    pub is_paid: bool,
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

impl ActiveModel {
    /// Builds a fresh, unpaid row for a computed settlement.
    pub(crate) fn from_settlement(
        group_id: i64,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActiveValue::NotSet,
            group_id: ActiveValue::Set(group_id),
            from_user_id: ActiveValue::Set(settlement.from_user_id),
            to_user_id: ActiveValue::Set(settlement.to_user_id),
            amount_due_minor: ActiveValue::Set(settlement.amount.cents()),
            is_paid: ActiveValue::Set(false),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
        }
    }
}
