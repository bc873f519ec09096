//! Chunk fetchers for each kind of remote collection.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::scheduler::ChunkFetcher;
use super::types::FetchChunk;
use crate::api::error::Result as ApiResult;
use crate::api::methods::{
    PROFILE_LOOKUP, PROFILE_LOOKUP_CEILING, engagement_params, profile_lookup_params,
};
use crate::api::{
    ApiError, BatchRequestCompiler, CallGateway, ContentItem, Credential, CredentialPool,
    EngagementHit, Endpoint, PageWindow, Params, RemoteEntity, SubCall, decode_conversation_members,
    decode_page, fetch_fanout, fetch_window,
};

/// Ask the remote side for the size of a collection with a one-item page.
pub async fn discover_total(
    gateway: &CallGateway,
    pool: &CredentialPool,
    endpoint: Endpoint,
    params: &Params,
) -> ApiResult<u64> {
    let probe = params.clone().with("offset", 0).with("count", 1);
    let rotation = pool.select_rotation(0);
    let (value, _) = gateway
        .call_rotating(&rotation, endpoint.method(), &probe)
        .await?;
    Ok(decode_page(endpoint.method(), value)?.count)
}

/// Items of a paginated list.
pub trait PageItem: Sized + Send + 'static {
    fn decode_all(method: &str, values: Vec<Value>) -> ApiResult<Vec<Self>>;
}

impl PageItem for RemoteEntity {
    fn decode_all(method: &str, values: Vec<Value>) -> ApiResult<Vec<Self>> {
        RemoteEntity::from_values(method, values)
    }
}

impl PageItem for ContentItem {
    fn decode_all(method: &str, values: Vec<Value>) -> ApiResult<Vec<Self>> {
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| ApiError::decode(method, e.to_string())))
            .collect()
    }
}

/// Fetches an offset/count range of one list endpoint.
pub struct ListFetcher<T> {
    gateway: CallGateway,
    compiler: Arc<dyn BatchRequestCompiler>,
    endpoint: Endpoint,
    params: Params,
    _items: PhantomData<fn() -> T>,
}

impl<T: PageItem> ListFetcher<T> {
    pub fn new(
        gateway: CallGateway,
        compiler: Arc<dyn BatchRequestCompiler>,
        endpoint: Endpoint,
        params: Params,
    ) -> Self {
        Self {
            gateway,
            compiler,
            endpoint,
            params,
            _items: PhantomData,
        }
    }

    pub fn window(&self, chunk: &FetchChunk) -> PageWindow {
        PageWindow {
            method: self.endpoint.method(),
            params: self.params.clone(),
            offset: chunk.offset,
            count: chunk.count,
            page_size: self.endpoint.page_ceiling(),
        }
    }
}

#[async_trait]
impl<T: PageItem> ChunkFetcher for ListFetcher<T> {
    type Output = Vec<T>;

    async fn fetch(&self, chunk: &FetchChunk, credential: &Credential) -> ApiResult<Vec<T>> {
        let window = self.window(chunk);
        let page = fetch_window(&self.gateway, credential, self.compiler.as_ref(), &window).await?;
        T::decode_all(window.method, page.items)
    }

    fn items(output: &Vec<T>) -> usize {
        output.len()
    }
}

/// Members of one message dialog.
#[derive(Debug, Clone)]
pub struct DialogMembers {
    pub peer_id: i64,
    pub members: Vec<RemoteEntity>,
}

/// One chunk per dialog: chunk `i` lists the members of peer `i`.
pub struct DialogFetcher {
    gateway: CallGateway,
    peers: Arc<[i64]>,
}

impl DialogFetcher {
    pub fn new(gateway: CallGateway, peers: impl Into<Arc<[i64]>>) -> Self {
        Self {
            gateway,
            peers: peers.into(),
        }
    }
}

#[async_trait]
impl ChunkFetcher for DialogFetcher {
    type Output = DialogMembers;

    async fn fetch(&self, chunk: &FetchChunk, credential: &Credential) -> ApiResult<DialogMembers> {
        let method = Endpoint::ConversationMembers.method();
        let Some(&peer_id) = self.peers.get(chunk.index) else {
            return Err(ApiError::decode(method, format!("no dialog for chunk {}", chunk.index)));
        };
        let params = crate::api::methods::conversation_members_params(peer_id);
        let value = self.gateway.call(credential, method, &params).await?;
        let page = decode_conversation_members(method, value)?;
        Ok(DialogMembers {
            peer_id,
            members: page.items,
        })
    }

    fn items(output: &DialogMembers) -> usize {
        output.members.len()
    }
}

/// A content item whose engagement list is to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementTarget {
    pub item_id: i64,
    pub owner_id: i64,
    /// Size reported by the item's own counter.
    pub reported: u64,
}

/// First page of one item's engagement list.
#[derive(Debug, Clone)]
pub struct ItemEngagement {
    pub target: EngagementTarget,
    /// True size of the list.
    pub total: u64,
    /// Raw entries returned, including ones that are not people.
    pub retrieved: u64,
    pub hits: Vec<EngagementHit>,
}

/// Hits on `item_id` among raw engagement list entries.
pub(crate) fn hits_from(item_id: i64, entries: &[Value]) -> Vec<EngagementHit> {
    entries
        .iter()
        .filter_map(|entry| EngagementHit::from_value(item_id, entry))
        .collect()
}

/// Decode an engagement list page: true count, raw entries, hits.
fn engagement_page(
    method: &str,
    item_id: i64,
    value: Value,
) -> ApiResult<(u64, u64, Vec<EngagementHit>)> {
    let page = decode_page(method, value)?;
    let hits = hits_from(item_id, &page.items);
    Ok((page.count, page.items.len() as u64, hits))
}

/// Fast pass: the first page of every target's engagement list, fanned out.
///
/// Chunk offsets index into the target list.
pub struct FastScanFetcher {
    gateway: CallGateway,
    compiler: Arc<dyn BatchRequestCompiler>,
    endpoint: Endpoint,
    targets: Arc<[EngagementTarget]>,
}

impl FastScanFetcher {
    pub fn new(
        gateway: CallGateway,
        compiler: Arc<dyn BatchRequestCompiler>,
        endpoint: Endpoint,
        targets: impl Into<Arc<[EngagementTarget]>>,
    ) -> Self {
        Self {
            gateway,
            compiler,
            endpoint,
            targets: targets.into(),
        }
    }

    fn slice(&self, chunk: &FetchChunk) -> &[EngagementTarget] {
        let start = (chunk.offset as usize).min(self.targets.len());
        let end = (chunk.end() as usize).min(self.targets.len());
        &self.targets[start..end]
    }
}

#[async_trait]
impl ChunkFetcher for FastScanFetcher {
    type Output = Vec<ItemEngagement>;

    async fn fetch(
        &self,
        chunk: &FetchChunk,
        credential: &Credential,
    ) -> ApiResult<Vec<ItemEngagement>> {
        let method = self.endpoint.method();
        let targets = self.slice(chunk);
        let calls: Vec<SubCall> = targets
            .iter()
            .map(|t| SubCall {
                method,
                params: engagement_params(self.endpoint, t.owner_id, t.item_id)
                    .with("offset", 0)
                    .with("count", self.endpoint.page_ceiling()),
            })
            .collect();

        let results =
            fetch_fanout(&self.gateway, credential, self.compiler.as_ref(), &calls).await?;

        let mut fetched = Vec::with_capacity(targets.len());
        for (target, result) in targets.iter().zip(results) {
            // A failed sub-call leaves the item unfetched.
            let Some(value) = result else { continue };
            let (count, retrieved, hits) = engagement_page(method, target.item_id, value)?;
            fetched.push(ItemEngagement {
                target: *target,
                total: count.max(target.reported),
                retrieved,
                hits,
            });
        }
        Ok(fetched)
    }

    fn items(output: &Vec<ItemEngagement>) -> usize {
        output.len()
    }
}

/// Split ids into profile lookup groups.
pub fn lookup_groups(ids: &[i64]) -> Vec<Vec<i64>> {
    ids.chunks(PROFILE_LOOKUP_CEILING)
        .map(<[i64]>::to_vec)
        .collect()
}

/// Profile-only lookups; chunk offsets index into the id groups.
pub struct ProfileFetcher {
    gateway: CallGateway,
    compiler: Arc<dyn BatchRequestCompiler>,
    groups: Arc<[Vec<i64>]>,
}

impl ProfileFetcher {
    pub fn new(
        gateway: CallGateway,
        compiler: Arc<dyn BatchRequestCompiler>,
        groups: Vec<Vec<i64>>,
    ) -> Self {
        Self {
            gateway,
            compiler,
            groups: groups.into(),
        }
    }

    pub fn group_count(&self) -> u64 {
        self.groups.len() as u64
    }
}

#[async_trait]
impl ChunkFetcher for ProfileFetcher {
    type Output = Vec<RemoteEntity>;

    async fn fetch(
        &self,
        chunk: &FetchChunk,
        credential: &Credential,
    ) -> ApiResult<Vec<RemoteEntity>> {
        let start = (chunk.offset as usize).min(self.groups.len());
        let end = (chunk.end() as usize).min(self.groups.len());
        let calls: Vec<SubCall> = self.groups[start..end]
            .iter()
            .map(|ids| SubCall {
                method: PROFILE_LOOKUP,
                params: profile_lookup_params(ids),
            })
            .collect();

        let results =
            fetch_fanout(&self.gateway, credential, self.compiler.as_ref(), &calls).await?;
        let mut profiles = Vec::new();
        for value in results.into_iter().flatten() {
            let Value::Array(entries) = value else {
                return Err(ApiError::decode(PROFILE_LOOKUP, "profile lookup is not an array"));
            };
            profiles.extend(RemoteEntity::from_values(PROFILE_LOOKUP, entries)?);
        }
        Ok(profiles)
    }

    fn items(output: &Vec<RemoteEntity>) -> usize {
        output.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gateway::tests::Scripted;
    use crate::api::{GatewayPolicy, ScriptCompiler, SequentialCompiler};
    use crate::entity::collection_kind::CollectionKind;
    use crate::sync::types::SyncScope;
    use serde_json::json;

    fn gateway(outcomes: Vec<ApiResult<Value>>) -> CallGateway {
        CallGateway::new(Arc::new(Scripted::new(outcomes)), GatewayPolicy::immediate())
    }

    fn credential() -> Credential {
        Credential::new("fetch-credential-01").with_rate_limit(1000)
    }

    fn chunk(offset: u64, count: u64) -> FetchChunk {
        FetchChunk {
            index: 0,
            offset,
            count,
            rotation_start: 0,
            scope: SyncScope::new("acme", CollectionKind::Likes),
        }
    }

    #[tokio::test]
    async fn discover_reads_count() {
        let gw = gateway(vec![Ok(json!({"count": 12345, "items": [1]}))]);
        let pool = CredentialPool::new([credential()]);
        let total = discover_total(&gw, &pool, Endpoint::Members, &Params::new())
            .await
            .unwrap();
        assert_eq!(total, 12_345);
    }

    #[tokio::test]
    async fn list_fetcher_decodes_entities() {
        let gw = gateway(vec![Ok(json!({"count": 3, "items": [1, {"id": 2}, 3]}))]);
        let fetcher: ListFetcher<RemoteEntity> = ListFetcher::new(
            gw,
            Arc::new(SequentialCompiler),
            Endpoint::Members,
            Params::new(),
        );
        let out = fetcher.fetch(&chunk(0, 3), &credential()).await.unwrap();
        assert_eq!(out.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fast_scan_skips_failed_subcalls() {
        let targets = vec![
            EngagementTarget {
                item_id: 10,
                owner_id: -1,
                reported: 2,
            },
            EngagementTarget {
                item_id: 11,
                owner_id: -1,
                reported: 5,
            },
        ];
        // Sequential compiler: one direct call per target.
        let gw = gateway(vec![
            Ok(json!({"count": 2, "items": [7, 8]})),
            Ok(json!({"count": 1500, "items": [9]})),
        ]);
        let fetcher = FastScanFetcher::new(
            gw,
            Arc::new(SequentialCompiler),
            Endpoint::Likes,
            targets,
        );
        let out = fetcher.fetch(&chunk(0, 2), &credential()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hits.len(), 2);
        assert_eq!(out[1].total, 1500);
        assert_eq!(out[1].retrieved, 1);
    }

    #[tokio::test]
    async fn scripted_fast_scan_drops_false_entries() {
        let targets: Vec<EngagementTarget> = (10..13)
            .map(|item_id| EngagementTarget {
                item_id,
                owner_id: -1,
                reported: 1,
            })
            .collect();
        // One script for the three targets; the middle sub-call failed.
        let api = Arc::new(Scripted::new(vec![Ok(json!([
            {"count": 2, "items": [7, 8]},
            false,
            {"count": 1, "items": [9]},
        ]))]));
        let gw = CallGateway::new(api.clone(), GatewayPolicy::immediate());
        let fetcher = FastScanFetcher::new(
            gw,
            Arc::new(ScriptCompiler::default()),
            Endpoint::Likes,
            targets,
        );

        let out = fetcher.fetch(&chunk(0, 3), &credential()).await.unwrap();

        assert_eq!(api.methods(), vec![crate::api::methods::EXECUTE]);
        assert_eq!(
            out.iter().map(|e| e.target.item_id).collect::<Vec<_>>(),
            vec![10, 12]
        );
        assert_eq!(out[0].total, 2);
        assert_eq!(out[0].hits.len(), 2);
        assert_eq!(out[1].retrieved, 1);
    }

    #[test]
    fn lookup_groups_respect_ceiling() {
        let ids: Vec<i64> = (0..2_001).collect();
        let groups = lookup_groups(&ids);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[2], vec![2_000]);
    }
}
