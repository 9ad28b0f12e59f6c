use std::error::Error;

use clap::{Args, Parser, Subcommand};
use engine::{Capability, Engine, EngineError, ErrorKind, Money};
use identity::{CallerContext, IdentityProvider, LocalIdentity};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

mod identity;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "splitledger")]
#[command(about = "Shared-expense groups: log bills, settle up")]
struct Cli {
    /// Optional settings file path (TOML), defaults to `settings.toml`.
    #[arg(long)]
    config: Option<String>,

    /// Override the configured database connection string.
    #[arg(long)]
    database_url: Option<String>,

    /// Id of the user issuing the command.
    #[arg(long = "as-user", env = "SPLITLEDGER_USER")]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage groups and their members.
    Group(Group),
    /// Record and edit bills.
    Bill(Bill),
    /// Compute and inspect settlements.
    Settle(Settle),
    /// Inspect your own capability grants.
    Grants(Grants),
}

#[derive(Args, Debug)]
struct Group {
    #[command(subcommand)]
    command: GroupCommand,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Remove {
        #[arg(long)]
        group: i64,
    },
    List,
    Show {
        #[arg(long)]
        group: i64,
    },
    Assign {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        user: i64,
    },
}

#[derive(Args, Debug)]
struct Bill {
    #[command(subcommand)]
    command: BillCommand,
}

#[derive(Subcommand, Debug)]
enum BillCommand {
    Add {
        #[arg(long)]
        group: i64,
        /// Amount paid, e.g. `12.50`.
        #[arg(long, allow_hyphen_values = true)]
        amount: Money,
        /// Who paid, defaults to the caller.
        #[arg(long)]
        payer: Option<i64>,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        bill: i64,
        #[arg(long, allow_hyphen_values = true)]
        amount: Money,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        bill: i64,
    },
    List {
        #[arg(long)]
        group: i64,
    },
}

#[derive(Args, Debug)]
struct Settle {
    #[command(subcommand)]
    command: SettleCommand,
}

#[derive(Subcommand, Debug)]
enum SettleCommand {
    Compute {
        #[arg(long)]
        group: i64,
    },
    Recalc {
        #[arg(long)]
        group: i64,
    },
    Clear {
        #[arg(long)]
        group: i64,
    },
    List {
        #[arg(long)]
        group: i64,
    },
}

#[derive(Args, Debug)]
struct Grants {
    #[command(subcommand)]
    command: GrantsCommand,
}

#[derive(Subcommand, Debug)]
enum GrantsCommand {
    List,
}

fn to_json<T: Serialize>(value: T) -> Result<Value, Box<dyn Error + Send + Sync>> {
    Ok(serde_json::to_value(value)?)
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Upstream => 1,
        ErrorKind::Invalid => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Forbidden => 4,
        ErrorKind::Conflict => 5,
    }
}

async fn connect_db(
    database_url: &str,
) -> Result<sea_orm::DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = sea_orm::Database::connect(database_url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

async fn dispatch(
    engine: &Engine,
    user_id: i64,
    command: Command,
) -> Result<Value, Box<dyn Error + Send + Sync>> {
    let value = match command {
        Command::Group(Group { command }) => match command {
            GroupCommand::Create { name, description } => to_json(
                engine
                    .create_group(user_id, &name, description.as_deref())
                    .await?,
            )?,
            GroupCommand::Update {
                group,
                name,
                description,
            } => to_json(
                engine
                    .update_group(user_id, group, &name, description.as_deref())
                    .await?,
            )?,
            GroupCommand::Remove { group } => {
                engine.remove_group(user_id, group).await?;
                json!({ "removed": group })
            }
            GroupCommand::List => to_json(engine.list_user_groups(user_id).await?)?,
            GroupCommand::Show { group } => to_json(engine.group_details(user_id, group).await?)?,
            GroupCommand::Assign { group, user } => {
                engine.assign_user_to_group(user_id, user, group).await?;
                json!({ "group": group, "assigned": user })
            }
        },
        Command::Bill(Bill { command }) => match command {
            BillCommand::Add {
                group,
                amount,
                payer,
                description,
            } => to_json(
                engine
                    .create_group_bill(user_id, group, payer, amount, description.as_deref())
                    .await?,
            )?,
            BillCommand::Update {
                group,
                bill,
                amount,
                description,
            } => to_json(
                engine
                    .update_group_bill(user_id, group, bill, amount, description.as_deref())
                    .await?,
            )?,
            BillCommand::Delete { group, bill } => {
                engine.delete_group_bill(user_id, group, bill).await?;
                json!({ "deleted": bill })
            }
            BillCommand::List { group } => to_json(engine.list_group_bills(user_id, group).await?)?,
        },
        Command::Settle(Settle { command }) => match command {
            SettleCommand::Compute { group } => {
                to_json(engine.compute_settlement(user_id, group).await?)?
            }
            SettleCommand::Recalc { group } => {
                to_json(engine.recalculate_settlement(user_id, group).await?)?
            }
            SettleCommand::Clear { group } => {
                engine
                    .validate_user_group_permission(user_id, group, Capability::Edit)
                    .await?;
                engine.clear_settlement(group).await?;
                json!({ "cleared": group })
            }
            SettleCommand::List { group } => to_json(engine.list_transfers(user_id, group).await?)?,
        },
        Command::Grants(Grants {
            command: GrantsCommand::List,
        }) => to_json(engine.list_user_grants(user_id).await?)?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut settings = settings::Settings::new(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        settings.database.url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "splitledger={level},engine={level},migration={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let user_id = match LocalIdentity.verify_caller(&CallerContext { user: cli.as_user }) {
        Ok(user_id) => user_id,
        Err(err) => {
            eprintln!("error: {err} (pass --as-user or set SPLITLEDGER_USER)");
            std::process::exit(exit_code(ErrorKind::Forbidden));
        }
    };

    let db = connect_db(&settings.database.url).await?;
    let engine = Engine::builder().database(db).build().await?;

    let span = tracing::info_span!("request", request_id = %Uuid::new_v4(), user_id);
    match dispatch(&engine, user_id, cli.command).instrument(span).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => match err.downcast::<EngineError>() {
            Ok(err) => {
                eprintln!("error: {err}");
                std::process::exit(exit_code(err.kind()));
            }
            Err(err) => Err(err),
        },
    }
}
