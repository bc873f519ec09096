//! Schema migrations for the roster cache (feature `migrate`).
//!
//! Bookkeeping lives in its own `roster_migrations` table so the cache can
//! share a database with other sea-orm applications.

pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_schema;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20261001_000001_create_schema::Migration)]
    }

    fn migration_table_name() -> SeaRc<dyn Iden> {
        SeaRc::new(Alias::new("roster_migrations"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_by_name() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names[0].starts_with("m20261001_000001"));
    }

    #[test]
    fn bookkeeping_table_is_namespaced() {
        assert_eq!(Migrator::migration_table_name().to_string(), "roster_migrations");
    }
}
