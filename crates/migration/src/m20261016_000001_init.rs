//! Initial schema.
//!
//! - `groups`: expense-sharing groups, soft-deleted via `deleted_at`
//! - `group_user_permissions`: capability grants per (group, user)
//! - `bills`: amounts paid by a member on the group's behalf
//! - `bill_splits`: settlement transfers, one active generation per group

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Groups {
    Table,
    Id,
    OwnerId,
    Name,
    Description,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
enum GroupUserPermissions {
    Table,
    Id,
    GroupId,
    UserId,
    Capability,
    IsActive,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
enum Bills {
    Table,
    Id,
    UserId,
    GroupId,
    PaidAmountMinor,
    Description,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
enum BillSplits {
    Table,
    Id,
    GroupId,
    FromUserId,
    ToUserId,
    AmountDueMinor,
    IsPaid,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

// At most one live grant per (group, user, capability). Revoked rows stay in
// the table, so the constraint has to be partial.
const ACTIVE_GRANT_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
    \"ux-group_user_permissions-active\" \
    ON group_user_permissions (group_id, user_id, capability) \
    WHERE is_active = 1 AND deleted_at IS NULL";

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Groups
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Groups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Groups::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Groups::OwnerId).big_integer().not_null())
                    .col(ColumnDef::new(Groups::Name).string().not_null())
                    .col(ColumnDef::new(Groups::Description).string())
                    .col(ColumnDef::new(Groups::CreatedBy).big_integer().not_null())
                    .col(ColumnDef::new(Groups::UpdatedBy).big_integer().not_null())
                    .col(
                        ColumnDef::new(Groups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Groups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Groups::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-groups-owner_id")
                    .table(Groups::Table)
                    .col(Groups::OwnerId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Group user permissions
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(GroupUserPermissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GroupUserPermissions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::GroupId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::Capability)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupUserPermissions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GroupUserPermissions::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-group_user_permissions-group_id")
                            .from(GroupUserPermissions::Table, GroupUserPermissions::GroupId)
                            .to(Groups::Table, Groups::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-group_user_permissions-user_id")
                    .table(GroupUserPermissions::Table)
                    .col(GroupUserPermissions::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-group_user_permissions-group_id")
                    .table(GroupUserPermissions::Table)
                    .col(GroupUserPermissions::GroupId)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(ACTIVE_GRANT_INDEX)
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Bills
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Bills::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Bills::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Bills::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Bills::GroupId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Bills::PaidAmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bills::Description).string())
                    .col(
                        ColumnDef::new(Bills::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bills::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bills::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-bills-group_id")
                            .from(Bills::Table, Bills::GroupId)
                            .to(Groups::Table, Groups::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-bills-group_id")
                    .table(Bills::Table)
                    .col(Bills::GroupId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Bill splits
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(BillSplits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BillSplits::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BillSplits::GroupId).big_integer().not_null())
                    .col(
                        ColumnDef::new(BillSplits::FromUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BillSplits::ToUserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(BillSplits::AmountDueMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BillSplits::IsPaid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BillSplits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BillSplits::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BillSplits::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-bill_splits-group_id")
                            .from(BillSplits::Table, BillSplits::GroupId)
                            .to(Groups::Table, Groups::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-bill_splits-group_id")
                    .table(BillSplits::Table)
                    .col(BillSplits::GroupId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BillSplits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bills::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GroupUserPermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Groups::Table).to_owned())
            .await?;
        Ok(())
    }
}
