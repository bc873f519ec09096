//! Freshness counters and recent membership history of a project.

use chrono::{DateTime, FixedOffset, Utc};
use clap::ValueEnum;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use roster::entity::history_event::Model as HistoryModel;
use roster::entity::sync_meta::Model as SyncMetaModel;
use roster::store;

/// Output format for status display.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// One synced scope.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
pub(crate) struct MetaDisplay {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Count")]
    pub count: i64,
    #[tabled(rename = "Last Updated")]
    pub last_updated: String,
    #[tabled(rename = "Age")]
    #[serde(skip)]
    pub age: String,
}

impl MetaDisplay {
    fn from_model(model: &SyncMetaModel, now: DateTime<Utc>) -> Self {
        Self {
            kind: model.kind.to_string(),
            count: model.count,
            last_updated: model.last_updated_iso(),
            age: format_age(model.last_updated, now),
        }
    }
}

/// One join or leave.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
pub(crate) struct HistoryDisplay {
    #[tabled(rename = "When")]
    pub occurred_at: String,
    #[tabled(rename = "Event")]
    pub event: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Id")]
    pub remote_id: i64,
    #[tabled(rename = "Name")]
    pub name: String,
}

impl From<&HistoryModel> for HistoryDisplay {
    fn from(model: &HistoryModel) -> Self {
        let name = [model.first_name.as_deref(), model.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            occurred_at: model.occurred_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            event: model.event.to_string(),
            source: model.source.to_string(),
            remote_id: model.remote_id,
            name,
        }
    }
}

fn format_age(at: DateTime<FixedOffset>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3_600, (s % 3_600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3_600),
    }
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Handle the status command.
pub(crate) async fn handle_status(
    project: &str,
    history: u64,
    output: OutputFormat,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = roster::connect_and_migrate(database_url).await?;
    let now = Utc::now();

    let meta: Vec<MetaDisplay> = store::sync_meta_for(&db, project)
        .await?
        .iter()
        .map(|m| MetaDisplay::from_model(m, now))
        .collect();
    let events: Vec<HistoryDisplay> = if history > 0 {
        store::history_for(&db, project, None, history)
            .await?
            .iter()
            .map(HistoryDisplay::from)
            .collect()
    } else {
        Vec::new()
    };

    match output {
        OutputFormat::Table => {
            if meta.is_empty() {
                println!("Project '{project}' has not been synced yet.");
                return Ok(());
            }
            print_table(meta);
            if !events.is_empty() {
                println!();
                print_table(events);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "project": project,
                "scopes": meta,
                "history": events,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn age_is_humanized() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let at = |h: u32, m: u32| {
            Utc.with_ymd_and_hms(2024, 5, 2, h, m, 0)
                .unwrap()
                .fixed_offset()
        };
        assert_eq!(format_age(at(12, 0), now), "0s");
        assert_eq!(format_age(at(11, 15), now), "45m");
        assert_eq!(format_age(at(9, 30), now), "2h 30m");
        let two_days = Utc
            .with_ymd_and_hms(2024, 4, 30, 9, 0, 0)
            .unwrap()
            .fixed_offset();
        assert_eq!(format_age(two_days, now), "2d 3h");
    }

    #[test]
    fn history_names_skip_missing_parts() {
        use roster::entity::collection_kind::CollectionKind;

        let model = HistoryModel {
            id: uuid::Uuid::nil(),
            project: "acme".to_string(),
            event: CollectionKind::LeaveHistory,
            source: CollectionKind::Members,
            remote_id: 3,
            first_name: Some("Ada".to_string()),
            last_name: None,
            occurred_at: Utc::now().fixed_offset(),
        };
        let row = HistoryDisplay::from(&model);
        assert_eq!(row.name, "Ada");
        assert_eq!(row.event, "leave_history");
    }
}
