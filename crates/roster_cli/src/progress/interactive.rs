use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use roster::sync::SyncProgress;

/// Interactive progress reporter using indicatif.
///
/// Bars are keyed by scope. All mutable state sits behind one lock so that
/// events from concurrent workers update bars consistently.
pub(crate) struct InteractiveReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl InteractiveReporter {
    pub(crate) fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn handle(&self, event: SyncProgress) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::Discovered {
                scope,
                total,
                chunks,
                workers,
            } => {
                let pb = bars
                    .entry(scope.clone())
                    .or_insert_with(|| self.add_bar(&scope));
                pb.set_length(total);
                pb.set_position(0);
                pb.set_style(Self::bar_style());
                pb.disable_steady_tick();
                pb.set_message(format!("{chunks} chunks, {workers} workers"));
            }

            SyncProgress::ChunkFetched {
                scope,
                loaded,
                total,
                ..
            } => {
                if let Some(pb) = bars.get(&scope) {
                    if pb.length() != Some(total) {
                        pb.set_length(total);
                    }
                    pb.set_position(loaded);
                }
            }

            SyncProgress::ChunkFailed { scope, index, .. } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("chunk {index} failed, queued for retry"));
                }
            }

            SyncProgress::Requeueing { scope, count } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("⟳ retrying {count} chunks"));
                }
            }

            SyncProgress::ChunkRecovered { scope, index, .. } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("chunk {index} recovered"));
                }
            }

            SyncProgress::ChunkLost {
                scope,
                index,
                error,
            } => {
                drop(bars);
                self.multi
                    .println(format!("✗ {scope}: chunk {index} lost: {error}"))
                    .ok();
            }

            SyncProgress::DeepScan {
                scope,
                items,
                requests,
            } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("deep scan: {items} items, {requests} requests"));
                }
            }

            SyncProgress::Reconciled {
                scope,
                joined,
                left,
                ..
            } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("+{joined} -{left}"));
                }
            }

            SyncProgress::Writing {
                scope,
                session,
                sessions,
                ..
            } => {
                if let Some(pb) = bars.get(&scope) {
                    pb.set_message(format!("saving {}/{}", session + 1, sessions));
                }
            }

            SyncProgress::Committed { scope, count } => {
                let pb = bars
                    .entry(scope.clone())
                    .or_insert_with(|| self.add_bar(&scope));
                pb.set_style(Self::bar_style());
                pb.finish_with_message(format!("✓ {count} stored"));
            }

            SyncProgress::Aborted { scope, message } => {
                let pb = bars
                    .entry(scope.clone())
                    .or_insert_with(|| self.add_bar(&scope));
                pb.abandon_with_message(format!("✗ {message}"));
            }

            SyncProgress::Enriching { scope, ids } => {
                let key = format!("{scope} profiles");
                let pb = bars.entry(key.clone()).or_insert_with(|| {
                    let pb = self.add_bar(&key);
                    pb.set_style(Self::spinner_style());
                    pb.enable_steady_tick(Duration::from_millis(100));
                    pb
                });
                pb.set_message(format!("enriching {ids} profiles"));
            }

            SyncProgress::Warning { message } => {
                drop(bars);
                self.multi.println(format!("⚠ {message}")).ok();
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub(crate) fn finish(&self) {
        let bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for pb in bars.values() {
            if !pb.is_finished() {
                pb.finish();
            }
        }
    }

    fn add_bar(&self, prefix: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(Self::spinner_style());
        pb.set_prefix(format!("{prefix:24}"));
        pb
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> InteractiveReporter {
        let reporter = InteractiveReporter::new();
        reporter
            .multi
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        reporter
    }

    #[test]
    fn bars_follow_scope_events() {
        let r = reporter();
        r.handle(SyncProgress::Discovered {
            scope: "acme/members".to_string(),
            total: 1200,
            chunks: 2,
            workers: 2,
        });
        r.handle(SyncProgress::ChunkFetched {
            scope: "acme/members".to_string(),
            index: 0,
            items: 600,
            loaded: 600,
            total: 1200,
        });
        {
            let bars = r.bars.lock().unwrap();
            let pb = &bars["acme/members"];
            assert_eq!(pb.length(), Some(1200));
            assert_eq!(pb.position(), 600);
        }

        r.handle(SyncProgress::Committed {
            scope: "acme/members".to_string(),
            count: 1200,
        });
        assert!(r.bars.lock().unwrap()["acme/members"].is_finished());
    }

    #[test]
    fn commit_without_discovery_creates_a_bar() {
        let r = reporter();
        r.handle(SyncProgress::Committed {
            scope: "acme/authors".to_string(),
            count: 3,
        });
        assert!(r.bars.lock().unwrap()["acme/authors"].is_finished());
        r.finish();
    }
}
