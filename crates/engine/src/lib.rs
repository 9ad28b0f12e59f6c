//! Permission-gated shared-expense settlement.
//!
//! Members of a group log the bills they paid; the [`Engine`] turns the
//! group's bills into the transfers that equalize everyone's spend. Every
//! group-scoped operation is gated by a per-user [`Capability`] grant.
//!
//! ```no_run
//! # async fn run(db: sea_orm::DatabaseConnection) -> Result<(), engine::EngineError> {
//! let engine = engine::Engine::builder().database(db).build().await?;
//! let group = engine.create_group(1, "Trip", None).await?;
//! engine.assign_user_to_group(1, 2, group.id).await?;
//! engine
//!     .create_group_bill(1, group.id, None, "90.00".parse()?, Some("hotel"))
//!     .await?;
//! engine
//!     .create_group_bill(1, group.id, Some(2), "30.00".parse()?, Some("taxi"))
//!     .await?;
//! // 2 owes 1 thirty.
//! let transfers = engine.compute_settlement(1, group.id).await?;
//! assert_eq!(transfers.len(), 1);
//! # Ok(())
//! # }
//! ```

pub use bill_splits::SettlementTransfer;
pub use bills::Bill;
pub use error::{EngineError, ErrorKind};
pub use grants::{Capability, CapabilityGrant};
pub use groups::Group;
pub use money::Money;
pub use ops::{Engine, EngineBuilder, GroupDetails, UserGroup};
pub use settlement::{MemberBalance, Settlement, member_balances, settle};

pub mod bill_splits;
pub mod bills;
mod error;
pub mod grants;
pub mod groups;
mod locks;
mod money;
mod ops;
mod settlement;

type ResultEngine<T> = Result<T, EngineError>;
