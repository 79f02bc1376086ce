//! Per-request execution state and runtime nodes.
//!
//! `ExecutionState` is the explicit context object every executor result
//! flows into: the store-data map, the ordered response trace, and the
//! append-only answer accumulator. It is owned by one run and never shared
//! across requests.
//!
//! `RuntimeNode` is a node instantiated from its template for one request.
//! Its input/output cells live behind a per-node mutex; the completion
//! check in [`RuntimeNode::feed`] is the single critical section that makes
//! concurrent feeds safe.

use promptweave_core::node::{InputPort, NodeKind, NodeTemplate, OutputPort};
use promptweave_core::quote::QuoteItem;
use promptweave_core::record::{NodeResponse, NodeUsage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

/// Lifecycle of a node within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Waiting for required inputs.
    Pending,
    /// Executor triggered.
    Running,
    /// Executor finished (successfully or not). Terminal.
    Completed,
    /// Required inputs can never arrive; the node never ran. Terminal.
    Unreachable,
}

struct NodeCell {
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    phase: NodePhase,
}

/// One instantiated node. Mutable only through the per-node lock.
pub struct RuntimeNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub config: serde_json::Map<String, Value>,
    pub entry: bool,
    cell: Mutex<NodeCell>,
}

/// What a `feed` call did.
pub enum FeedResult {
    /// Value written (or port unknown); node not yet runnable.
    Stored,
    /// This feed completed the node's required inputs: run it with this
    /// input snapshot. Returned exactly once per node per request.
    Triggered(serde_json::Map<String, Value>),
}

impl RuntimeNode {
    pub fn from_template(template: &NodeTemplate) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            kind: template.kind.clone(),
            config: template.config.clone(),
            entry: template.entry,
            cell: Mutex::new(NodeCell {
                inputs: template.inputs.clone(),
                outputs: template.outputs.clone(),
                phase: NodePhase::Pending,
            }),
        }
    }

    pub fn phase(&self) -> NodePhase {
        self.cell.lock().expect("node lock poisoned").phase
    }

    /// Write one input value, then check required-input completion.
    ///
    /// The write and the check share the node lock, so concurrent feeds to
    /// the same node serialize and at most one observes the transition to
    /// `Running`. Feeding an unknown key or an already-triggered node is a
    /// no-op write, never a re-trigger.
    pub fn feed(&self, key: &str, value: Value) -> FeedResult {
        let mut cell = self.cell.lock().expect("node lock poisoned");

        if let Some(port) = cell.inputs.iter_mut().find(|p| p.key == key) {
            port.value = Some(value);
        }

        if cell.phase != NodePhase::Pending {
            return FeedResult::Stored;
        }

        let satisfied = cell
            .inputs
            .iter()
            .filter(|p| p.required)
            .all(|p| p.value.is_some());
        if !satisfied {
            return FeedResult::Stored;
        }

        cell.phase = NodePhase::Running;
        let params = cell
            .inputs
            .iter()
            .filter_map(|p| p.value.clone().map(|v| (p.key.clone(), v)))
            .collect();
        FeedResult::Triggered(params)
    }

    /// Write an input value without a completion check. Used once the run
    /// is cancelled: values are still recorded, nothing new triggers.
    pub fn store_input(&self, key: &str, value: Value) {
        let mut cell = self.cell.lock().expect("node lock poisoned");
        if let Some(port) = cell.inputs.iter_mut().find(|p| p.key == key) {
            port.value = Some(value);
        }
    }

    /// Mark the executor finished.
    pub fn complete(&self) {
        self.cell.lock().expect("node lock poisoned").phase = NodePhase::Completed;
    }

    /// Mark a never-run node unreachable at quiescence.
    pub fn mark_unreachable_if_pending(&self) {
        let mut cell = self.cell.lock().expect("node lock poisoned");
        if cell.phase == NodePhase::Pending {
            cell.phase = NodePhase::Unreachable;
        }
    }

    /// Set output values from an executor result map and return the
    /// fan-out actions. Values already set are immutable and skipped;
    /// declared defaults fill keys the result omits.
    pub fn resolve_outputs(&self, result: &serde_json::Map<String, Value>) -> Vec<ResolvedOutput> {
        let mut cell = self.cell.lock().expect("node lock poisoned");
        let mut resolved = Vec::new();

        for port in cell.outputs.iter_mut() {
            let value = match result.get(&port.key) {
                Some(v) => v.clone(),
                None => match &port.default {
                    Some(d) => d.clone(),
                    None => continue,
                },
            };

            if port.value.is_some() {
                warn!(node_id = %self.id, key = %port.key, "Output already set, ignoring write");
                continue;
            }
            port.value = Some(value.clone());

            resolved.push(ResolvedOutput {
                key: port.key.clone(),
                value,
                response_visible: port.response_visible,
                answer_fragment: port.answer_fragment,
                targets: port.targets.clone(),
            });
        }

        resolved
    }
}

/// One output port resolved by [`RuntimeNode::resolve_outputs`].
pub struct ResolvedOutput {
    pub key: String,
    pub value: Value,
    pub response_visible: bool,
    pub answer_fragment: bool,
    pub targets: Vec<promptweave_core::node::Target>,
}

/// Per-request mutable state, monotonically growing.
pub struct ExecutionState {
    store_data: HashMap<String, Value>,
    response_data: Vec<NodeResponse>,
    answer_text: String,
    usages: Vec<NodeUsage>,
    cited_quotes: Vec<QuoteItem>,
    errors: Vec<String>,
    last_snapshot: Instant,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            store_data: HashMap::new(),
            response_data: Vec::new(),
            answer_text: String::new(),
            usages: Vec::new(),
            cited_quotes: Vec::new(),
            errors: Vec::new(),
            last_snapshot: Instant::now(),
        }
    }

    /// First write wins; collisions are dropped, never overwritten.
    pub fn insert_store(&mut self, key: &str, value: Value) {
        if self.store_data.contains_key(key) {
            warn!(key, "store_data key already resolved, keeping first value");
            return;
        }
        self.store_data.insert(key.to_string(), value);
    }

    pub fn store_value(&self, key: &str) -> Option<&Value> {
        self.store_data.get(key)
    }

    /// Append one node's response-visible snapshot.
    pub fn push_response(
        &mut self,
        node: &RuntimeNode,
        values: serde_json::Map<String, Value>,
    ) {
        let now = Instant::now();
        let running_time_ms = now.duration_since(self.last_snapshot).as_millis() as u64;
        self.last_snapshot = now;

        self.response_data.push(NodeResponse {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            kind: node.kind.clone(),
            running_time_ms,
            values,
        });
    }

    pub fn append_answer(&mut self, fragment: &str) {
        self.answer_text.push_str(fragment);
    }

    pub fn push_usage(&mut self, usage: NodeUsage) {
        self.usages.push(usage);
    }

    pub fn extend_cited(&mut self, quotes: Vec<QuoteItem>) {
        self.cited_quotes.extend(quotes);
    }

    pub fn push_error(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    pub fn cited_count(&self) -> usize {
        self.cited_quotes.len()
    }

    pub fn total_tokens(&self) -> u32 {
        self.usages.iter().map(|u| u.total_tokens).sum()
    }

    /// Decompose into record parts at quiescence.
    pub fn into_parts(
        self,
    ) -> (
        String,
        Vec<NodeResponse>,
        Vec<QuoteItem>,
        Vec<NodeUsage>,
        Vec<String>,
    ) {
        (
            self.answer_text,
            self.response_data,
            self.cited_quotes,
            self.usages,
            self.errors,
        )
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptweave_core::node::{NodeKind, NodeTemplate, OutputPort};
    use serde_json::json;

    fn switch_template() -> NodeTemplate {
        NodeTemplate::new("s1", "Switch", NodeKind::Switch)
            .input(InputPort::required("condition"))
            .input(InputPort::optional("note"))
            .output(OutputPort::new("true"))
            .output(OutputPort::new("false"))
    }

    #[test]
    fn feed_triggers_once_when_required_inputs_complete() {
        let node = RuntimeNode::from_template(&switch_template());

        match node.feed("condition", json!(true)) {
            FeedResult::Triggered(params) => {
                assert_eq!(params.get("condition"), Some(&json!(true)));
                assert!(!params.contains_key("note"));
            }
            FeedResult::Stored => panic!("expected trigger"),
        }
        assert_eq!(node.phase(), NodePhase::Running);

        // Re-feeding a satisfied node never re-triggers.
        assert!(matches!(
            node.feed("condition", json!(false)),
            FeedResult::Stored
        ));
    }

    #[test]
    fn feed_waits_for_all_required_inputs() {
        let template = NodeTemplate::new("m", "Model", NodeKind::ModelCompletion)
            .input(InputPort::required("userChatInput"))
            .input(InputPort::required("quotePrompt"));
        let node = RuntimeNode::from_template(&template);

        assert!(matches!(
            node.feed("userChatInput", json!("hi")),
            FeedResult::Stored
        ));
        match node.feed("quotePrompt", json!("")) {
            FeedResult::Triggered(params) => {
                assert_eq!(params.len(), 2);
            }
            FeedResult::Stored => panic!("expected trigger"),
        }
    }

    #[test]
    fn concurrent_feeds_trigger_exactly_once() {
        use std::sync::Arc;

        let template = NodeTemplate::new("m", "M", NodeKind::Answer)
            .input(InputPort::required("a"))
            .input(InputPort::required("b"));
        let node = Arc::new(RuntimeNode::from_template(&template));

        let mut handles = Vec::new();
        for key in ["a", "b", "a", "b", "a", "b"] {
            let node = node.clone();
            handles.push(std::thread::spawn(move || {
                matches!(node.feed(key, json!(1)), FeedResult::Triggered(_))
            }));
        }

        let triggers = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&triggered| triggered)
            .count();
        assert_eq!(triggers, 1);
        assert_eq!(node.phase(), NodePhase::Running);
    }

    #[test]
    fn outputs_are_immutable_once_set() {
        let node = RuntimeNode::from_template(&switch_template());

        let mut result = serde_json::Map::new();
        result.insert("true".into(), json!(1));
        let resolved = node.resolve_outputs(&result);
        assert_eq!(resolved.len(), 1);

        // Second write to the same port is dropped.
        let resolved = node.resolve_outputs(&result);
        assert!(resolved.is_empty());
    }

    #[test]
    fn output_defaults_fill_missing_keys() {
        let template = NodeTemplate::new("n", "N", NodeKind::Custom("x".into()))
            .output(OutputPort::new("finish").with_default(json!(true)));
        let node = RuntimeNode::from_template(&template);

        let resolved = node.resolve_outputs(&serde_json::Map::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, json!(true));
    }

    #[test]
    fn store_data_first_write_wins() {
        let mut state = ExecutionState::new();
        state.insert_store("answerText", json!("first"));
        state.insert_store("answerText", json!("second"));
        assert_eq!(state.store_value("answerText"), Some(&json!("first")));
    }

    #[test]
    fn answer_text_appends_in_order() {
        let mut state = ExecutionState::new();
        state.append_answer("Hello, ");
        state.append_answer("world");
        assert_eq!(state.answer_text(), "Hello, world");
    }

    #[test]
    fn unreachable_only_from_pending() {
        let node = RuntimeNode::from_template(&switch_template());
        node.feed("condition", json!(1));
        node.complete();
        node.mark_unreachable_if_pending();
        assert_eq!(node.phase(), NodePhase::Completed);

        let untouched = RuntimeNode::from_template(&switch_template());
        untouched.mark_unreachable_if_pending();
        assert_eq!(untouched.phase(), NodePhase::Unreachable);
    }
}
