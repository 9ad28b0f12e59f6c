use sea_orm::Database;
use sea_orm_migration::prelude::*;

use migration::Migrator;

/// Same database the `splitledger` binary uses when nothing is configured.
const DEFAULT_DATABASE_URL: &str = "sqlite:./splitledger.db?mode=rwc";

/// The app's environment override wins over the generic `DATABASE_URL`.
fn database_url(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["SPLITLEDGER__DATABASE__URL", "DATABASE_URL"]
        .into_iter()
        .find_map(|key| lookup(key).filter(|url| !url.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

fn usage() -> ! {
    eprintln!("Usage: cargo run -p migration -- [up|down [steps]|fresh|status]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut args = std::env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "up".to_string());

    let db = Database::connect(&database_url(|key| std::env::var(key).ok())).await?;

    match cmd.as_str() {
        "up" => Migrator::up(&db, None).await?,
        "down" => {
            // Without a count every applied migration is rolled back.
            let steps = match args.next() {
                Some(raw) => Some(raw.parse::<u32>().unwrap_or_else(|_| usage())),
                None => None,
            };
            Migrator::down(&db, steps).await?
        }
        "fresh" => Migrator::fresh(&db).await?,
        "status" => Migrator::status(&db).await?,
        _ => usage(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_with(vars: &[(&str, &str)]) -> String {
        database_url(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| ToString::to_string(value))
        })
    }

    #[test]
    fn app_override_wins_over_database_url() {
        let url = url_with(&[
            ("DATABASE_URL", "sqlite:./other.db"),
            ("SPLITLEDGER__DATABASE__URL", "sqlite:./ledger.db"),
        ]);
        assert_eq!(url, "sqlite:./ledger.db");
    }

    #[test]
    fn blank_values_fall_through_to_the_default() {
        assert_eq!(url_with(&[("DATABASE_URL", "sqlite:./other.db")]), "sqlite:./other.db");
        assert_eq!(url_with(&[("SPLITLEDGER__DATABASE__URL", "  ")]), DEFAULT_DATABASE_URL);
    }
}
