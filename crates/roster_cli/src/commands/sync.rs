//! Sync commands: mirror one collection kind of a configured project.

use std::sync::Arc;
use std::time::Instant;

use clap::{Subcommand, ValueEnum};
use console::{Term, style};

use roster::api::HttpRemoteApi;
use roster::entity::collection_kind::CollectionKind;
use roster::sync::{Project, SyncContext, SyncReport};

use crate::config::Config;
use crate::progress::ProgressReporter;

/// Sync subcommands.
#[derive(Subcommand)]
pub(crate) enum SyncAction {
    /// Mirror the community member list and record joins and leaves
    Members {
        /// Project name from the [[projects]] config
        project: String,
    },
    /// Mirror the participants of every configured dialog
    Dialogs {
        /// Project name from the [[projects]] config
        project: String,
    },
    /// Mirror content authors and engagement lists
    Engagement {
        /// Project name from the [[projects]] config
        project: String,

        /// Engagement kinds to scan (default: all) - can specify multiple
        #[arg(short, long = "kind", value_enum)]
        kinds: Vec<EngagementKind>,
    },
    /// Re-fetch full profiles of everyone already cached
    Enrich {
        /// Project name from the [[projects]] config
        project: String,

        /// Only enrich this kind (default: every profile-bearing kind)
        #[arg(short, long, value_enum)]
        kind: Option<ProfileKind>,
    },
}

/// Engagement list kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum EngagementKind {
    Likes,
    Comments,
    Reshares,
}

impl From<EngagementKind> for CollectionKind {
    fn from(kind: EngagementKind) -> Self {
        match kind {
            EngagementKind::Likes => CollectionKind::Likes,
            EngagementKind::Comments => CollectionKind::Comments,
            EngagementKind::Reshares => CollectionKind::Reshares,
        }
    }
}

/// Kinds whose rows carry profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ProfileKind {
    Members,
    Dialogs,
    Authors,
    Likes,
    Comments,
    Reshares,
}

impl From<ProfileKind> for CollectionKind {
    fn from(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Members => CollectionKind::Members,
            ProfileKind::Dialogs => CollectionKind::DialogParticipants,
            ProfileKind::Authors => CollectionKind::Authors,
            ProfileKind::Likes => CollectionKind::Likes,
            ProfileKind::Comments => CollectionKind::Comments,
            ProfileKind::Reshares => CollectionKind::Reshares,
        }
    }
}

fn engagement_kinds(kinds: &[EngagementKind]) -> Vec<CollectionKind> {
    if kinds.is_empty() {
        return CollectionKind::ENGAGEMENT.to_vec();
    }
    let mut selected: Vec<CollectionKind> = kinds.iter().map(|&k| k.into()).collect();
    selected.dedup();
    selected
}

fn enrich_kinds(kind: Option<ProfileKind>) -> Vec<CollectionKind> {
    match kind {
        Some(kind) => vec![kind.into()],
        None => CollectionKind::ALL
            .into_iter()
            .filter(|k| !k.is_history())
            .collect(),
    }
}

impl SyncAction {
    fn project(&self) -> &str {
        match self {
            SyncAction::Members { project }
            | SyncAction::Dialogs { project }
            | SyncAction::Engagement { project, .. }
            | SyncAction::Enrich { project, .. } => project,
        }
    }
}

/// Handle sync commands.
pub(crate) async fn handle_sync(
    action: SyncAction,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let project = config.project(action.project())?;
    if project.pool.is_empty() {
        return Err(format!("Project '{}' has no tokens configured.", project.name).into());
    }
    let options = config.sync_options()?;

    let db = roster::connect_and_migrate(database_url).await?;
    let api = HttpRemoteApi::new(
        &config.api.base_url,
        config.api.version.as_deref(),
        config.api_timeout(),
    )?;

    let reporter = Arc::new(ProgressReporter::new());
    let ctx = SyncContext::builder()
        .api(Arc::new(api))
        .database(Arc::new(db))
        .options(options)
        .progress(reporter.as_callback())
        .build()?;

    let started = Instant::now();
    let result = run(&ctx, &project, action).await;
    reporter.finish();

    let outcome = result?;
    match outcome {
        Outcome::Reports(reports) => {
            for report in &reports {
                print_report(report);
            }
        }
        Outcome::Enriched(counts) => {
            for (kind, updated) in counts {
                print_line(&format!(
                    "{} {}/{}: {} profiles updated",
                    style("✓").green(),
                    project.name,
                    kind,
                    updated
                ));
            }
        }
    }

    let calls = ctx.call_stats();
    tracing::info!(
        project = %project.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        calls = calls.calls,
        failures = calls.failures,
        rate_limited = calls.rate_limited,
        retries = calls.retries,
        "sync finished"
    );
    Ok(())
}

enum Outcome {
    Reports(Vec<SyncReport>),
    Enriched(Vec<(CollectionKind, u64)>),
}

async fn run(
    ctx: &SyncContext,
    project: &Project,
    action: SyncAction,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let outcome = match action {
        SyncAction::Members { .. } => Outcome::Reports(vec![ctx.sync_members(project).await?]),
        SyncAction::Dialogs { .. } => {
            if project.dialog_peers.is_empty() {
                return Err(format!(
                    "Project '{}' has no dialog_peers configured.",
                    project.name
                )
                .into());
            }
            Outcome::Reports(vec![ctx.sync_dialog_participants(project).await?])
        }
        SyncAction::Engagement { kinds, .. } => {
            let kinds = engagement_kinds(&kinds);
            Outcome::Reports(ctx.sync_content_and_engagement(project, &kinds).await?)
        }
        SyncAction::Enrich { kind, .. } => {
            let mut counts = Vec::new();
            for kind in enrich_kinds(kind) {
                counts.push((kind, ctx.enrich_scope(project, kind).await?));
            }
            Outcome::Enriched(counts)
        }
    };
    Ok(outcome)
}

fn print_line(line: &str) {
    if Term::stdout().is_term() {
        println!("{line}");
    } else {
        tracing::info!("{}", console::strip_ansi_codes(line));
    }
}

fn print_report(report: &SyncReport) {
    let mut line = format!(
        "{} {}: {}/{} fetched, {} stored",
        style("✓").green(),
        report.scope,
        report.fetched,
        report.expected,
        report.stored
    );
    if report.scope.kind.is_membership() {
        line.push_str(&format!(
            ", {} joined, {} left",
            style(report.joined).green(),
            style(report.left).red()
        ));
    } else if report.joined > 0 {
        line.push_str(&format!(", {} new", report.joined));
    }
    if report.deep_scanned > 0 {
        line.push_str(&format!(", {} deep-scanned", report.deep_scanned));
    }
    if report.requeued > 0 {
        line.push_str(&format!(", {} chunks retried", report.requeued));
    }
    print_line(&line);

    if report.lost > 0 {
        print_line(&format!(
            "{} {}: {} chunks lost{}",
            style("⚠").yellow(),
            report.scope,
            report.lost,
            if report.leaves_suppressed {
                ", leave detection skipped"
            } else {
                ""
            }
        ));
    }
}
