//! Schema management for the cache database.

use console::style;
use roster::migration::{Migrator, MigratorTrait};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::MigrateAction;

#[derive(Tabled)]
struct MigrationRow {
    #[tabled(rename = "Migration")]
    name: String,
    #[tabled(rename = "Status")]
    status: &'static str,
}

pub(crate) async fn handle_migrate(
    action: MigrateAction,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = roster::connect(database_url).await?;

    match action {
        MigrateAction::Up => {
            let pending = Migrator::get_pending_migrations(&db).await?;
            if pending.is_empty() {
                println!("Schema is up to date.");
                return Ok(());
            }
            println!("Applying {} migration(s)...", pending.len());
            Migrator::up(&db, None).await?;
            println!("{} Migrations applied.", style("✓").green());
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(&db, Some(1)).await?;
            println!("{} Rollback complete.", style("✓").green());
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(&db).await?;
            let pending = Migrator::get_pending_migrations(&db).await?;
            let rows: Vec<MigrationRow> = applied
                .iter()
                .map(|m| MigrationRow {
                    name: m.name().to_string(),
                    status: "applied",
                })
                .chain(pending.iter().map(|m| MigrationRow {
                    name: m.name().to_string(),
                    status: "pending",
                }))
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        MigrateAction::Fresh => {
            println!("Dropping all tables and reapplying migrations...");
            Migrator::fresh(&db).await?;
            println!("{} Fresh schema created.", style("✓").green());
        }
    }

    Ok(())
}
