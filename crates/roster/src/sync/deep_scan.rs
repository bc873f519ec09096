//! Deep scan of engagement lists that overflow one page.
//!
//! The fast pass reads the first page of every item's list. Items whose true
//! size exceeds that page get follow-up windows starting at the page ceiling,
//! each covering `page_ceiling * calls_per_request` entries, so one compiled
//! request serves one window.

use std::sync::Arc;

use async_trait::async_trait;

use super::fetch::{EngagementTarget, ItemEngagement, hits_from};
use super::scheduler::ChunkFetcher;
use super::types::{FetchChunk, SyncScope};
use crate::api::error::Result as ApiResult;
use crate::api::methods::engagement_params;
use crate::api::{
    ApiError, BatchRequestCompiler, CallGateway, Credential, CredentialPool, EngagementHit,
    Endpoint, PageWindow, fetch_window,
};

/// `(offset, count)` windows covering `[ceiling, total)` in steps of `step`.
///
/// Yields `ceil((total - ceiling) / step)` windows, none when the list fits
/// in one page.
pub fn plan_deep_windows(total: u64, ceiling: u64, step: u64) -> Vec<(u64, u64)> {
    let step = step.max(1);
    let mut windows = Vec::new();
    let mut offset = ceiling;
    while offset < total {
        let count = step.min(total - offset);
        windows.push((offset, count));
        offset += count;
    }
    windows
}

/// One follow-up window of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepWindow {
    pub target: EngagementTarget,
    pub offset: u64,
    pub count: u64,
}

/// Plans deep windows for overflowing items.
#[derive(Debug, Clone, Copy)]
pub struct DeepScanExpander {
    endpoint: Endpoint,
    step: u64,
}

impl DeepScanExpander {
    pub fn new(endpoint: Endpoint, calls_per_request: usize) -> Self {
        Self {
            endpoint,
            step: endpoint.page_ceiling() * calls_per_request.max(1) as u64,
        }
    }

    /// Entries one deep request covers.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// The fast page came back full and the list is longer than one page.
    pub fn needs_deep_scan(&self, fast: &ItemEngagement) -> bool {
        let ceiling = self.endpoint.page_ceiling();
        fast.total > ceiling && fast.retrieved >= ceiling
    }

    pub fn plan(&self, fast: &[ItemEngagement]) -> Vec<DeepWindow> {
        fast.iter()
            .filter(|item| self.needs_deep_scan(item))
            .flat_map(|item| {
                plan_deep_windows(item.total, self.endpoint.page_ceiling(), self.step)
                    .into_iter()
                    .map(|(offset, count)| DeepWindow {
                        target: item.target,
                        offset,
                        count,
                    })
            })
            .collect()
    }

    /// One chunk per window; chunk `i` is window `i`.
    pub fn chunks(
        &self,
        scope: &SyncScope,
        windows: &[DeepWindow],
        pool: &CredentialPool,
    ) -> Vec<FetchChunk> {
        windows
            .iter()
            .enumerate()
            .map(|(index, window)| FetchChunk {
                index,
                offset: window.offset,
                count: window.count,
                rotation_start: pool.rotation_start(index),
                scope: scope.clone(),
            })
            .collect()
    }
}

/// Entries of one deep window.
#[derive(Debug, Clone)]
pub struct DeepPage {
    pub item_id: i64,
    pub hits: Vec<EngagementHit>,
}

pub struct DeepScanFetcher {
    gateway: CallGateway,
    compiler: Arc<dyn BatchRequestCompiler>,
    endpoint: Endpoint,
    windows: Arc<[DeepWindow]>,
}

impl DeepScanFetcher {
    pub fn new(
        gateway: CallGateway,
        compiler: Arc<dyn BatchRequestCompiler>,
        endpoint: Endpoint,
        windows: impl Into<Arc<[DeepWindow]>>,
    ) -> Self {
        Self {
            gateway,
            compiler,
            endpoint,
            windows: windows.into(),
        }
    }
}

#[async_trait]
impl ChunkFetcher for DeepScanFetcher {
    type Output = DeepPage;

    async fn fetch(&self, chunk: &FetchChunk, credential: &Credential) -> ApiResult<DeepPage> {
        let method = self.endpoint.method();
        let Some(deep) = self.windows.get(chunk.index) else {
            return Err(ApiError::decode(
                method,
                format!("no deep window for chunk {}", chunk.index),
            ));
        };
        let window = PageWindow {
            method,
            params: engagement_params(self.endpoint, deep.target.owner_id, deep.target.item_id),
            offset: deep.offset,
            count: deep.count,
            page_size: self.endpoint.page_ceiling(),
        };
        let page = fetch_window(&self.gateway, credential, self.compiler.as_ref(), &window).await?;
        Ok(DeepPage {
            item_id: deep.target.item_id,
            hits: hits_from(deep.target.item_id, &page.items),
        })
    }

    fn items(output: &DeepPage) -> usize {
        output.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(total: u64, retrieved: u64) -> ItemEngagement {
        ItemEngagement {
            target: EngagementTarget {
                item_id: 1,
                owner_id: -5,
                reported: total,
            },
            total,
            retrieved,
            hits: Vec::new(),
        }
    }

    #[test]
    fn window_count_matches_ceiling_division() {
        for (total, ceiling, step) in [
            (2_500, 1_000, 1_000),
            (2_500, 1_000, 25_000),
            (30_000, 1_000, 25_000),
            (1_000, 1_000, 1_000),
            (1_001, 1_000, 1_000),
            (500, 1_000, 1_000),
        ] {
            let windows = plan_deep_windows(total, ceiling, step);
            let expected = total.saturating_sub(ceiling).div_ceil(step);
            assert_eq!(windows.len() as u64, expected, "{total}/{ceiling}/{step}");
            let covered: u64 = windows.iter().map(|(_, c)| c).sum();
            assert_eq!(covered, total.saturating_sub(ceiling));
        }
    }

    #[test]
    fn only_full_overflowing_pages_are_expanded() {
        let expander = DeepScanExpander::new(Endpoint::Likes, 1);
        assert!(expander.needs_deep_scan(&fast(2_500, 1_000)));
        assert!(!expander.needs_deep_scan(&fast(1_000, 1_000)));
        // Short first page: the list ended early.
        assert!(!expander.needs_deep_scan(&fast(2_500, 400)));
    }

    #[test]
    fn plan_uses_script_step() {
        let expander = DeepScanExpander::new(Endpoint::Likes, 25);
        assert_eq!(expander.step(), 25_000);
        let windows = expander.plan(&[fast(60_000, 1_000), fast(10, 10)]);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].offset, 1_000);
        assert_eq!(windows[2].count, 9_000);
    }
}
