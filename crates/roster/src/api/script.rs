//! Batch request compilation.
//!
//! A page window (offset/count over one paginated method) or a fan-out (the
//! same method over several targets) is compiled into the calls that fetch it.
//! [`ScriptCompiler`] bundles sub-calls into server-side scripts;
//! [`SequentialCompiler`] issues one call per page for platforms without a
//! script primitive.

use serde_json::Value;

use super::credential::Credential;
use super::error::{ApiError, Result};
use super::gateway::CallGateway;
use super::methods::EXECUTE;
use super::transport::Params;
use super::types::{Page, decode_page};

/// Platform ceiling on sub-calls bundled into one script.
pub const MAX_SUBCALLS_PER_SCRIPT: usize = 25;

/// An offset/count range of one paginated method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub method: &'static str,
    pub params: Params,
    pub offset: u64,
    pub count: u64,
    pub page_size: u64,
}

impl PageWindow {
    /// Number of sub-calls needed: `ceil(count / page_size)`.
    pub fn iterations(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.count.div_ceil(self.page_size)
    }

    pub fn end(&self) -> u64 {
        self.offset + self.count
    }
}

/// One call of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCall {
    pub method: &'static str,
    pub params: Params,
}

/// How to interpret a compiled call's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A `{count, items}` page, either direct or assembled by a script.
    Page,
    /// A direct single sub-call of a fan-out.
    Single,
    /// A script returning one result per bundled sub-call.
    Bundle { width: usize },
}

/// A ready-to-send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCall {
    pub method: String,
    pub params: Params,
    pub shape: Shape,
    /// Items a page call returns unless the collection ends inside it.
    pub covers: u64,
}

impl CompiledCall {
    /// Decode a fan-out payload into one optional result per sub-call.
    ///
    /// Scripts report a failed sub-call as `false`; that slot becomes `None`.
    pub fn decode_fanout(&self, value: Value) -> Result<Vec<Option<Value>>> {
        match self.shape {
            Shape::Single => Ok(vec![Some(value)]),
            Shape::Bundle { width } => {
                let Value::Array(results) = value else {
                    return Err(ApiError::decode(&self.method, "script result is not an array"));
                };
                if results.len() != width {
                    return Err(ApiError::decode(
                        &self.method,
                        format!("expected {width} results, got {}", results.len()),
                    ));
                }
                Ok(results
                    .into_iter()
                    .map(|v| match v {
                        Value::Bool(false) | Value::Null => None,
                        other => Some(other),
                    })
                    .collect())
            }
            Shape::Page => Err(ApiError::decode(&self.method, "page call decoded as fan-out")),
        }
    }
}

/// Compiles windows and fan-outs into calls.
pub trait BatchRequestCompiler: Send + Sync {
    fn compile_pages(&self, window: &PageWindow) -> Vec<CompiledCall>;
    fn compile_fanout(&self, calls: &[SubCall]) -> Vec<CompiledCall>;
    /// Sub-calls one compiled call covers at most.
    fn calls_per_request(&self) -> usize;
}

/// Bundles sub-calls into server-side scripts.
#[derive(Debug, Clone, Copy)]
pub struct ScriptCompiler {
    max_subcalls: usize,
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        Self::new(MAX_SUBCALLS_PER_SCRIPT)
    }
}

impl ScriptCompiler {
    /// Clamped to `1..=MAX_SUBCALLS_PER_SCRIPT`.
    pub fn new(max_subcalls: usize) -> Self {
        Self {
            max_subcalls: max_subcalls.clamp(1, MAX_SUBCALLS_PER_SCRIPT),
        }
    }

    fn literal(s: &str) -> String {
        // serde_json string escaping is valid script string syntax.
        Value::String(s.to_string()).to_string()
    }

    /// Object literal of the fixed params, with extra raw (unquoted) entries.
    fn object(params: &Params, raw: &[(&str, &str)]) -> String {
        let mut entries: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}:{}", Self::literal(k), Self::literal(v)))
            .collect();
        entries.extend(raw.iter().map(|(k, v)| format!("{}:{}", Self::literal(k), v)));
        format!("{{{}}}", entries.join(","))
    }

    /// Script looping over `iterations` pages starting at `offset`.
    fn page_script(window: &PageWindow, offset: u64, end: u64, iterations: u64) -> String {
        let args = Self::object(&window.params, &[("offset", "offset"), ("count", "n")]);
        format!(
            "var items=[];var total=0;var offset={offset};var end={end};var i=0;\
             while(i<{iterations}&&offset<end){{\
             var n=end-offset;if(n>{page}){{n={page};}}\
             var page=API.{method}({args});\
             total=page.count;items=items+page.items;\
             if(page.items.length<n){{offset=end;}}else{{offset=offset+n;}}\
             i=i+1;}}\
             return {{\"count\":total,\"items\":items}};",
            page = window.page_size,
            method = window.method,
        )
    }

    fn fanout_script(calls: &[SubCall]) -> String {
        let mut code = String::from("var out=[];");
        for call in calls {
            code.push_str(&format!(
                "out.push(API.{}({}));",
                call.method,
                Self::object(&call.params, &[])
            ));
        }
        code.push_str("return out;");
        code
    }
}

impl BatchRequestCompiler for ScriptCompiler {
    fn compile_pages(&self, window: &PageWindow) -> Vec<CompiledCall> {
        let span = self.max_subcalls as u64 * window.page_size;
        let mut calls = Vec::new();
        let mut offset = window.offset;
        while offset < window.end() && span > 0 {
            let end = (offset + span).min(window.end());
            let iterations = (end - offset).div_ceil(window.page_size);
            calls.push(CompiledCall {
                method: EXECUTE.to_string(),
                params: Params::new()
                    .with("code", Self::page_script(window, offset, end, iterations)),
                shape: Shape::Page,
                covers: end - offset,
            });
            offset = end;
        }
        calls
    }

    fn compile_fanout(&self, calls: &[SubCall]) -> Vec<CompiledCall> {
        calls
            .chunks(self.max_subcalls)
            .map(|group| CompiledCall {
                method: EXECUTE.to_string(),
                params: Params::new().with("code", Self::fanout_script(group)),
                shape: Shape::Bundle { width: group.len() },
                covers: 0,
            })
            .collect()
    }

    fn calls_per_request(&self) -> usize {
        self.max_subcalls
    }
}

/// One direct call per page or sub-call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialCompiler;

impl BatchRequestCompiler for SequentialCompiler {
    fn compile_pages(&self, window: &PageWindow) -> Vec<CompiledCall> {
        let mut calls = Vec::new();
        let mut offset = window.offset;
        while offset < window.end() && window.page_size > 0 {
            let count = window.page_size.min(window.end() - offset);
            calls.push(CompiledCall {
                method: window.method.to_string(),
                params: window
                    .params
                    .clone()
                    .with("offset", offset)
                    .with("count", count),
                shape: Shape::Page,
                covers: count,
            });
            offset += count;
        }
        calls
    }

    fn compile_fanout(&self, calls: &[SubCall]) -> Vec<CompiledCall> {
        calls
            .iter()
            .map(|call| CompiledCall {
                method: call.method.to_string(),
                params: call.params.clone(),
                shape: Shape::Single,
                covers: 0,
            })
            .collect()
    }

    fn calls_per_request(&self) -> usize {
        1
    }
}

/// Fetch a page window with one credential, concatenating the pages.
///
/// Stops early when a page comes back short (end of collection).
pub async fn fetch_window(
    gateway: &CallGateway,
    credential: &Credential,
    compiler: &dyn BatchRequestCompiler,
    window: &PageWindow,
) -> Result<Page<Value>> {
    let mut merged = Page::empty();
    for call in compiler.compile_pages(window) {
        let value = gateway.call(credential, &call.method, &call.params).await?;
        let page = decode_page(&call.method, value)?;
        let short = (page.items.len() as u64) < call.covers;
        merged.extend(page);
        if short {
            break;
        }
    }
    Ok(merged)
}

/// Run a fan-out with one credential, returning one optional result per sub-call.
pub async fn fetch_fanout(
    gateway: &CallGateway,
    credential: &Credential,
    compiler: &dyn BatchRequestCompiler,
    calls: &[SubCall],
) -> Result<Vec<Option<Value>>> {
    let mut results = Vec::with_capacity(calls.len());
    for call in compiler.compile_fanout(calls) {
        let value = gateway.call(credential, &call.method, &call.params).await?;
        results.extend(call.decode_fanout(value)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GatewayPolicy;
    use crate::api::gateway::tests::Scripted;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn scripted(outcomes: Vec<Result<Value>>) -> (Arc<Scripted>, CallGateway) {
        let api = Arc::new(Scripted::new(outcomes));
        let gateway = CallGateway::new(api.clone(), GatewayPolicy::immediate());
        (api, gateway)
    }

    fn credential() -> Credential {
        Credential::new("script-credential-01").with_rate_limit(1000)
    }

    fn ids(range: std::ops::Range<i64>) -> Value {
        Value::Array(range.map(|id| json!(id)).collect())
    }

    fn window(offset: u64, count: u64, page_size: u64) -> PageWindow {
        PageWindow {
            method: "groups.getMembers",
            params: Params::new().with("group_id", 1),
            offset,
            count,
            page_size,
        }
    }

    #[test]
    fn iterations_round_up() {
        assert_eq!(window(0, 600, 1000).iterations(), 1);
        assert_eq!(window(0, 2500, 1000).iterations(), 3);
        assert_eq!(window(0, 0, 1000).iterations(), 0);
    }

    #[test]
    fn sequential_pages_cover_window_exactly() {
        let calls = SequentialCompiler.compile_pages(&window(600, 2500, 1000));
        let ranges: Vec<(String, String)> = calls
            .iter()
            .map(|c| {
                (
                    c.params.get("offset").unwrap().to_string(),
                    c.params.get("count").unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            ranges,
            vec![
                ("600".into(), "1000".into()),
                ("1600".into(), "1000".into()),
                ("2600".into(), "500".into())
            ]
        );
    }

    #[test]
    fn scripts_respect_subcall_ceiling() {
        let compiler = ScriptCompiler::new(25);
        // 60 pages of 1000 need three scripts (25 + 25 + 10).
        let calls = compiler.compile_pages(&window(0, 60_000, 1000));
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.method == EXECUTE));
        let code = calls[2].params.get("code").unwrap();
        assert!(code.contains("var offset=50000;var end=60000;"));
        assert!(code.contains("while(i<10&&"));
    }

    #[test]
    fn compiler_clamps_subcalls() {
        assert_eq!(ScriptCompiler::new(100).calls_per_request(), MAX_SUBCALLS_PER_SCRIPT);
        assert_eq!(ScriptCompiler::new(0).calls_per_request(), 1);
    }

    #[test]
    fn script_literals_are_escaped() {
        let calls = ScriptCompiler::default().compile_fanout(&[SubCall {
            method: "likes.getList",
            params: Params::new().with("note", "a\"b"),
        }]);
        let code = calls[0].params.get("code").unwrap();
        assert!(code.contains(r#"API.likes.getList({"note":"a\"b"})"#));
    }

    #[test]
    fn fanout_groups_and_decodes_failures() {
        let subcalls: Vec<SubCall> = (0..30)
            .map(|i| SubCall {
                method: "likes.getList",
                params: Params::new().with("item_id", i),
            })
            .collect();
        let calls = ScriptCompiler::default().compile_fanout(&subcalls);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].shape, Shape::Bundle { width: 5 });

        let decoded = calls[1]
            .decode_fanout(serde_json::json!([{"count": 1, "items": [1]}, false, null, {}, {}]))
            .unwrap();
        assert_eq!(decoded.iter().filter(|r| r.is_none()).count(), 2);

        assert!(calls[1].decode_fanout(serde_json::json!([1])).is_err());
    }

    #[tokio::test]
    async fn window_spanning_several_scripts_is_concatenated() {
        // Two pages of 1000 per script: 5000 items need three scripts.
        let (api, gw) = scripted(vec![
            Ok(json!({"count": 5000, "items": ids(0..2000)})),
            Ok(json!({"count": 5000, "items": ids(2000..4000)})),
            Ok(json!({"count": 5000, "items": ids(4000..5000)})),
        ]);
        let compiler = ScriptCompiler::new(2);

        let page = fetch_window(&gw, &credential(), &compiler, &window(0, 5000, 1000))
            .await
            .unwrap();

        assert_eq!(page.count, 5000);
        assert_eq!(page.items.len(), 5000);
        assert_eq!(page.items[4999], json!(4999));
        assert_eq!(api.methods(), vec![EXECUTE; 3]);
    }

    #[tokio::test]
    async fn short_script_page_ends_the_window() {
        // The collection ends inside the second script.
        let (api, gw) = scripted(vec![
            Ok(json!({"count": 2700, "items": ids(0..2000)})),
            Ok(json!({"count": 2700, "items": ids(2000..2700)})),
        ]);
        let compiler = ScriptCompiler::new(2);

        let page = fetch_window(&gw, &credential(), &compiler, &window(0, 6000, 1000))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2700);
        assert_eq!(api.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bundled_fanout_keeps_one_slot_per_subcall() {
        let subcalls: Vec<SubCall> = (0..30)
            .map(|i| SubCall {
                method: "likes.getList",
                params: Params::new().with("item_id", i),
            })
            .collect();
        let mut first: Vec<Value> = (0..25).map(|i| json!({"count": 1, "items": [i]})).collect();
        first[3] = json!(false);
        first[17] = Value::Null;
        let (api, gw) = scripted(vec![
            Ok(Value::Array(first)),
            Ok(json!([{"count": 0, "items": []}, false, {}, {}, {}])),
        ]);

        let results = fetch_fanout(&gw, &credential(), &ScriptCompiler::default(), &subcalls)
            .await
            .unwrap();

        assert_eq!(results.len(), 30);
        assert!(results[3].is_none());
        assert!(results[17].is_none());
        assert!(results[26].is_none());
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 3);
        assert_eq!(results[4], Some(json!({"count": 1, "items": [4]})));
        assert_eq!(api.methods(), vec![EXECUTE; 2]);
    }

    #[tokio::test]
    async fn bundle_of_wrong_width_is_rejected() {
        let subcalls: Vec<SubCall> = (0..3)
            .map(|i| SubCall {
                method: "users.get",
                params: Params::new().with("user_ids", i),
            })
            .collect();
        let (_, gw) = scripted(vec![Ok(json!([[], []]))]);

        let err = fetch_fanout(&gw, &credential(), &ScriptCompiler::default(), &subcalls)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
