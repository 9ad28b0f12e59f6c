use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, prelude::*};

use crate::{Bill, Capability, EngineError, Money, ResultEngine, bills};

use super::{Engine, normalize_optional_text, with_tx};

fn ensure_not_negative(amount: Money) -> ResultEngine<()> {
    if amount.is_negative() {
        return Err(EngineError::Invalid(
            "paid amount must not be negative".to_string(),
        ));
    }
    Ok(())
}

impl Engine {
    /// Records a bill paid by `payer_id` (the caller when `None`).
    ///
    /// The caller needs `Create`. A payer other than the caller must be a
    /// member of the group (hold `View`).
    #[tracing::instrument(skip(self))]
    pub async fn create_group_bill(
        &self,
        user_id: i64,
        group_id: i64,
        payer_id: Option<i64>,
        amount: Money,
        description: Option<&str>,
    ) -> ResultEngine<Bill> {
        ensure_not_negative(amount)?;
        let description = normalize_optional_text(description);
        let payer_id = payer_id.unwrap_or(user_id);

        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Create)
                .await?;
            if payer_id != user_id
                && !self
                    .has_capability_in(&db_tx, payer_id, group_id, Capability::View)
                    .await?
            {
                return Err(EngineError::Invalid(
                    "payer is not a member of the group".to_string(),
                ));
            }

            let now = Utc::now();
            let model = bills::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(payer_id),
                group_id: ActiveValue::Set(group_id),
                paid_amount_minor: ActiveValue::Set(amount.cents()),
                description: ActiveValue::Set(description),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
                deleted_at: ActiveValue::Set(None),
            }
            .insert(&db_tx)
            .await
            .map_err(EngineError::upstream("failed to create bill"))?;

            tracing::info!(bill_id = model.id, "bill created");
            Ok(Bill::from(model))
        })
    }

    /// Changes the amount and description of a bill (requires `Edit`).
    ///
    /// Existing settlement transfers are left alone; run a recalculation to
    /// pick the change up.
    #[tracing::instrument(skip(self))]
    pub async fn update_group_bill(
        &self,
        user_id: i64,
        group_id: i64,
        bill_id: i64,
        amount: Money,
        description: Option<&str>,
    ) -> ResultEngine<Bill> {
        ensure_not_negative(amount)?;
        let description = normalize_optional_text(description);

        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Edit)
                .await?;
            let model = self.find_group_bill_in(&db_tx, group_id, bill_id).await?;

            let mut active: bills::ActiveModel = model.into();
            active.paid_amount_minor = ActiveValue::Set(amount.cents());
            active.description = ActiveValue::Set(description);
            active.updated_at = ActiveValue::Set(Utc::now());
            let updated = active
                .update(&db_tx)
                .await
                .map_err(EngineError::upstream("failed to update bill"))?;

            Ok(Bill::from(updated))
        })
    }

    /// Soft-deletes a bill (requires `Delete`).
    #[tracing::instrument(skip(self))]
    pub async fn delete_group_bill(
        &self,
        user_id: i64,
        group_id: i64,
        bill_id: i64,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::Delete)
                .await?;
            let model = self.find_group_bill_in(&db_tx, group_id, bill_id).await?;

            let now = Utc::now();
            let mut active: bills::ActiveModel = model.into();
            active.deleted_at = ActiveValue::Set(Some(now));
            active.updated_at = ActiveValue::Set(now);
            active
                .update(&db_tx)
                .await
                .map_err(EngineError::upstream("failed to delete bill"))?;

            tracing::info!("bill deleted");
            Ok(())
        })
    }

    /// Lists the group's live bills, oldest first (requires `View`).
    #[tracing::instrument(skip(self))]
    pub async fn list_group_bills(&self, user_id: i64, group_id: i64) -> ResultEngine<Vec<Bill>> {
        with_tx!(self, |db_tx| {
            self.require_capability(&db_tx, user_id, group_id, Capability::View)
                .await?;
            let models = self.bills_for_group_in(&db_tx, group_id).await?;
            Ok(models.into_iter().map(Bill::from).collect())
        })
    }

    pub(super) async fn bills_for_group_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
    ) -> ResultEngine<Vec<bills::Model>> {
        bills::Entity::find()
            .filter(bills::Column::GroupId.eq(group_id))
            .filter(bills::Column::DeletedAt.is_null())
            .order_by_asc(bills::Column::Id)
            .all(db)
            .await
            .map_err(EngineError::upstream("failed to fetch bills"))
    }

    async fn find_group_bill_in(
        &self,
        db: &DatabaseTransaction,
        group_id: i64,
        bill_id: i64,
    ) -> ResultEngine<bills::Model> {
        bills::Entity::find_by_id(bill_id)
            .filter(bills::Column::GroupId.eq(group_id))
            .filter(bills::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(EngineError::upstream("failed to fetch bills"))?
            .ok_or_else(|| EngineError::NotFound("bill not found in group".to_string()))
    }
}
