use sea_orm::DatabaseConnection;

use crate::{EngineError, ResultEngine, locks::GroupLocks};

mod access;
mod bills;
mod groups;
mod permissions;
mod settlement;

pub use groups::{GroupDetails, UserGroup};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
///
/// The transaction is dropped (and rolled back) on `Err`, on an early `?` and
/// when the enclosing future is cancelled.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = sea_orm::TransactionTrait::begin(&$self.database).await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// The permission-gated settlement engine.
///
/// Build it once per process and share it by reference (`Arc<Engine>`): it
/// owns the database handle and the per-group settlement locks.
#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    settlement_locks: GroupLocks,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }
}

fn normalize_required_name(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Invalid(format!(
            "{label} name must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
            settlement_locks: GroupLocks::default(),
        })
    }
}
