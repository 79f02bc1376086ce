//! The graph dispatcher — drives one request's node graph to quiescence.
//!
//! The dispatcher instantiates the stored graph, seeds entry-node inputs
//! from the request, and lets value propagation do the rest: every `feed`
//! that completes a node's required inputs spawns that node's executor as
//! an independent task; every executor result fans out through the node's
//! declared output ports into further feeds. The run is quiescent when no
//! executor task remains outstanding. Nodes whose required inputs never
//! arrive (the untaken branch of a switch) simply never run.
//!
//! Failure handling is a policy, not a constant: `AbortRun` cancels
//! scheduling on the first executor error, `IsolateBranch` lets sibling
//! branches finish. Cancellation never interrupts in-flight executors —
//! their results are still aggregated so the audit record stays correct.

use crate::emitter::StreamEmitter;
use crate::executors::{ExecutorContext, ExecutorOutput, ExecutorRegistry, RunDeps};
use crate::state::{ExecutionState, FeedResult, NodePhase, RuntimeNode};
use promptweave_core::error::{DispatchError, Error};
use promptweave_core::event::FlowStreamEvent;
use promptweave_core::message::{ChatTurn, ConversationId};
use promptweave_core::node::{FlowGraph, NodeTemplate};
use promptweave_core::record::{FlowRunRecord, NodeUsage, RunSink};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens to the rest of the run when one branch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchFailurePolicy {
    /// First executor error cancels scheduling for the whole run.
    #[default]
    AbortRun,
    /// The failing node records its error; sibling branches finish. The
    /// failed node's own subgraph stays unreachable either way.
    IsolateBranch,
}

/// Per-run limits and policies.
#[derive(Debug, Clone, Copy)]
pub struct RunPolicy {
    pub branch_failure: BranchFailurePolicy,

    /// Upper bound on executor invocations per request.
    pub max_node_runs: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            branch_failure: BranchFailurePolicy::AbortRun,
            max_node_runs: 64,
        }
    }
}

/// One incoming request: the new user turn plus its context.
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    pub conversation_id: Option<ConversationId>,
    pub question: String,
    pub history: Vec<ChatTurn>,

    /// Quotes carried over from the previous turn, seeded into entry
    /// nodes that declare a `fixedQuotes` input.
    pub fixed_quotes: Vec<promptweave_core::quote::QuoteItem>,

    /// Request variables substituted into `{{placeholders}}` in node
    /// templates and seeded into matching entry inputs.
    pub variables: HashMap<String, String>,
}

/// The result of one run.
#[derive(Debug)]
pub struct FlowOutcome {
    pub record: FlowRunRecord,

    /// Terminal phase of every node.
    pub phases: HashMap<String, NodePhase>,

    /// Errors recorded by isolated branches.
    pub errors: Vec<String>,

    /// Set when the run aborted on an executor error. The record still
    /// holds everything aggregated up to the abort, and any streaming
    /// client has already received a terminal error frame.
    pub failure: Option<String>,
}

/// The dispatcher. Owns the executor registry, backends, and run policy;
/// one instance serves many concurrent requests.
pub struct FlowDispatcher {
    registry: Arc<ExecutorRegistry>,
    deps: Arc<RunDeps>,
    policy: RunPolicy,
    sinks: Vec<Arc<dyn RunSink>>,
}

impl FlowDispatcher {
    pub fn new(registry: ExecutorRegistry, deps: RunDeps) -> Self {
        Self {
            registry: Arc::new(registry),
            deps: Arc::new(deps),
            policy: RunPolicy::default(),
            sinks: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add a persistence/billing collaborator, notified after quiescence.
    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Execute `graph` for one request, writing frames to `emitter`.
    ///
    /// Returns `Err` only for failures before dispatch starts (input
    /// validation, invalid graph). Executor failures after dispatch begins
    /// surface through [`FlowOutcome::failure`] so the partial trace is
    /// still recorded.
    pub async fn run(
        &self,
        graph: &FlowGraph,
        request: FlowRequest,
        emitter: StreamEmitter,
    ) -> Result<FlowOutcome, Error> {
        if request.question.trim().is_empty() {
            return Err(DispatchError::MissingParam("userChatInput".into()).into());
        }
        graph
            .validate()
            .map_err(|e| Error::from(DispatchError::InvalidGraph(e)))?;

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_default();

        let nodes: HashMap<String, Arc<RuntimeNode>> = graph
            .nodes
            .iter()
            .map(|template| {
                let node = instantiate(template, &request.variables);
                (node.id.clone(), Arc::new(node))
            })
            .collect();

        emitter.set_preface(FlowStreamEvent::Metadata {
            conversation_id: conversation_id.to_string(),
            quote_count: 0,
        });

        let ctx = Arc::new(RunCtx {
            nodes,
            state: tokio::sync::Mutex::new(ExecutionState::new()),
            emitter,
            cancel: CancellationToken::new(),
            registry: self.registry.clone(),
            deps: self.deps.clone(),
            policy: self.policy,
            history: Arc::new(request.history),
            conversation_id: conversation_id.clone(),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
            runs_left: AtomicI64::new(self.policy.max_node_runs as i64),
            failure: std::sync::Mutex::new(None),
        });

        info!(
            conversation_id = %conversation_id,
            nodes = ctx.nodes.len(),
            streaming = ctx.emitter.is_streaming(),
            "Dispatching flow run"
        );

        // Seed entry nodes; this is what begins execution.
        let seeds = seed_params(
            &request.question,
            &ctx.history,
            &request.fixed_quotes,
            &request.variables,
        );
        let entry_ids: Vec<String> = ctx
            .nodes
            .values()
            .filter(|n| n.entry)
            .map(|n| n.id.clone())
            .collect();
        for node_id in entry_ids {
            for (key, value) in &seeds {
                feed(&ctx, &node_id, key, value.clone());
            }
        }

        // Quiescence: wait until no executor task remains outstanding.
        loop {
            let notified = ctx.idle.notified();
            if ctx.outstanding.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        for node in ctx.nodes.values() {
            node.mark_unreachable_if_pending();
        }
        let phases: HashMap<String, NodePhase> = ctx
            .nodes
            .values()
            .map(|n| (n.id.clone(), n.phase()))
            .collect();

        let failure = ctx.failure.lock().expect("failure lock poisoned").take();

        let state = std::mem::take(&mut *ctx.state.lock().await);
        let (answer_text, response_data, cited_quotes, usages, errors) = state.into_parts();
        let total_tokens = usages.iter().map(|u| u.total_tokens).sum();

        let record = FlowRunRecord {
            conversation_id,
            answer_text,
            response_data,
            cited_quotes,
            usages,
            total_tokens,
            finished_at: chrono::Utc::now(),
        };

        match &failure {
            Some(message) => {
                warn!(message = %message, "Flow run aborted");
                ctx.emitter
                    .send(FlowStreamEvent::Error {
                        message: message.clone(),
                    })
                    .await;
            }
            None => {
                // A run that produced no fragment still owes the metadata.
                if let Some(preface) = ctx.emitter.take_preface() {
                    ctx.emitter.send(preface).await;
                }
                ctx.emitter
                    .send(FlowStreamEvent::Done {
                        conversation_id: record.conversation_id.to_string(),
                        total_tokens: record.total_tokens,
                    })
                    .await;
            }
        }

        // Collaborators record even aborted runs: completed nodes are
        // billable.
        for sink in &self.sinks {
            sink.record(&record).await;
        }

        Ok(FlowOutcome {
            record,
            phases,
            errors,
            failure,
        })
    }
}

struct RunCtx {
    nodes: HashMap<String, Arc<RuntimeNode>>,
    state: tokio::sync::Mutex<ExecutionState>,
    emitter: StreamEmitter,
    cancel: CancellationToken,
    registry: Arc<ExecutorRegistry>,
    deps: Arc<RunDeps>,
    policy: RunPolicy,
    history: Arc<Vec<ChatTurn>>,
    conversation_id: ConversationId,
    outstanding: AtomicUsize,
    idle: Notify,
    runs_left: AtomicI64,
    failure: std::sync::Mutex<Option<String>>,
}

/// Entry-node seed values: the new user turn, the conversation history,
/// carried-over quotes, and every request variable under its own key.
fn seed_params(
    question: &str,
    history: &[ChatTurn],
    fixed_quotes: &[promptweave_core::quote::QuoteItem],
    variables: &HashMap<String, String>,
) -> Vec<(String, Value)> {
    // The question seeds last: it is the usual completion trigger, and
    // optional inputs (history, carried quotes, variables) must already be
    // in place when it fires.
    let mut seeds = vec![
        ("history".to_string(), json!(history)),
        ("fixedQuotes".to_string(), json!(fixed_quotes)),
    ];
    for (key, value) in variables {
        seeds.push((key.clone(), json!(value)));
    }
    seeds.push(("userChatInput".to_string(), json!(question)));
    seeds
}

/// Instantiate a template, substituting `{{var}}` placeholders in string
/// input values and string config values.
fn instantiate(template: &NodeTemplate, variables: &HashMap<String, String>) -> RuntimeNode {
    let mut template = template.clone();
    for input in &mut template.inputs {
        if let Some(Value::String(s)) = &input.value {
            input.value = Some(Value::String(substitute(s, variables)));
        }
    }
    for (_, value) in template.config.iter_mut() {
        if let Value::String(s) = value {
            *value = Value::String(substitute(s, variables));
        }
    }
    RuntimeNode::from_template(&template)
}

fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Write one value into a node input and trigger its executor if this feed
/// completed the required set. Safe under concurrent calls; a cancelled
/// run still records the value but schedules nothing new.
fn feed(ctx: &Arc<RunCtx>, node_id: &str, key: &str, value: Value) {
    let Some(node) = ctx.nodes.get(node_id) else {
        warn!(node_id, key, "Feed target node not found");
        return;
    };

    if ctx.cancel.is_cancelled() {
        node.store_input(key, value);
        return;
    }

    match node.feed(key, value) {
        FeedResult::Stored => {}
        FeedResult::Triggered(params) => {
            if ctx.runs_left.fetch_sub(1, Ordering::SeqCst) <= 0 {
                fail(
                    ctx,
                    DispatchError::RunBudgetExhausted {
                        max: ctx.policy.max_node_runs,
                    }
                    .to_string(),
                    // budget exhaustion always stops the run
                    BranchFailurePolicy::AbortRun,
                );
                return;
            }
            spawn_executor(ctx.clone(), node.clone(), params);
        }
    }
}

fn spawn_executor(
    ctx: Arc<RunCtx>,
    node: Arc<RuntimeNode>,
    params: serde_json::Map<String, Value>,
) {
    ctx.outstanding.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        run_node(&ctx, &node, params).await;
        if ctx.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            ctx.idle.notify_waiters();
        }
    });
}

async fn run_node(
    ctx: &Arc<RunCtx>,
    node: &Arc<RuntimeNode>,
    params: serde_json::Map<String, Value>,
) {
    debug!(node_id = %node.id, kind = %node.kind, "Node executor starting");

    if ctx.emitter.is_streaming() {
        ctx.emitter
            .send(FlowStreamEvent::Status {
                node_id: node.id.clone(),
                name: node.name.clone(),
            })
            .await;
    }

    let executor = match ctx.registry.get(node.kind.as_tag()) {
        Ok(executor) => executor,
        Err(e) => {
            node.complete();
            fail(ctx, e.to_string(), ctx.policy.branch_failure);
            record_error(ctx, e.to_string()).await;
            return;
        }
    };

    let exec_ctx = ExecutorContext {
        node_id: node.id.clone(),
        node_name: node.name.clone(),
        config: node.config.clone(),
        params,
        history: ctx.history.clone(),
        streaming: ctx.emitter.is_streaming(),
        emitter: ctx.emitter.clone(),
        cancel: ctx.cancel.clone(),
        deps: ctx.deps.clone(),
    };

    match executor.run(exec_ctx).await {
        Ok(output) => {
            node.complete();
            fold_output(ctx, node, output).await;
        }
        Err(e) => {
            node.complete();
            warn!(node_id = %node.id, error = %e, "Node executor failed");
            fail(ctx, e.to_string(), ctx.policy.branch_failure);
            record_error(ctx, e.to_string()).await;
        }
    }
}

/// Fold an executor's output into the run: usage and quote bookkeeping,
/// short-circuit handling, then output fan-out.
async fn fold_output(ctx: &Arc<RunCtx>, node: &Arc<RuntimeNode>, output: ExecutorOutput) {
    {
        let mut state = ctx.state.lock().await;
        if let Some(usage) = &output.usage {
            state.push_usage(NodeUsage {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                model: usage.model.clone(),
                total_tokens: usage.total_tokens,
            });
        }
        if !output.cited_quotes.is_empty() {
            state.extend_cited(output.cited_quotes.clone());
            // The metadata frame carries the retrieved-quote count; keep
            // the staged preface current until the first fragment flushes
            // it.
            ctx.emitter.set_preface(FlowStreamEvent::Metadata {
                conversation_id: ctx.conversation_id.to_string(),
                quote_count: state.cited_count(),
            });
        }
    }

    if let Some(fallback) = output.short_circuit {
        info!(node_id = %node.id, "Empty retrieval with fallback, short-circuiting run");
        ctx.state.lock().await.append_answer(&fallback);
        ctx.emitter
            .send(FlowStreamEvent::Answer { content: fallback })
            .await;
        ctx.cancel.cancel();
        return;
    }

    produce_outputs(ctx, node, &output).await;
}

/// Output fan-out: set declared port values, snapshot response-visible
/// ones, append/stream answer fragments, then feed every declared target.
async fn produce_outputs(ctx: &Arc<RunCtx>, node: &Arc<RuntimeNode>, output: &ExecutorOutput) {
    let resolved = node.resolve_outputs(&output.result);

    let mut visible = serde_json::Map::new();
    {
        let mut state = ctx.state.lock().await;
        for out in &resolved {
            state.insert_store(&out.key, out.value.clone());
            if out.response_visible {
                visible.insert(out.key.clone(), out.value.clone());
            }
            if out.answer_fragment {
                let text = value_as_text(&out.value);
                if !text.is_empty() {
                    state.append_answer(&text);
                }
            }
        }
        if !visible.is_empty() {
            state.push_response(node, visible);
        }
    }

    // Stream fragments now, unless the executor already streamed its own
    // token deltas.
    if !output.streamed {
        for out in &resolved {
            if out.answer_fragment {
                let text = value_as_text(&out.value);
                if !text.is_empty() {
                    ctx.emitter
                        .send(FlowStreamEvent::Answer { content: text })
                        .await;
                }
            }
        }
    }

    for out in &resolved {
        for target in &out.targets {
            feed(ctx, &target.node_id, &target.input_key, out.value.clone());
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply the branch-failure policy for one failed node.
fn fail(ctx: &Arc<RunCtx>, message: String, policy: BranchFailurePolicy) {
    if policy == BranchFailurePolicy::AbortRun {
        let mut slot = ctx.failure.lock().expect("failure lock poisoned");
        if slot.is_none() {
            *slot = Some(message);
        }
        ctx.cancel.cancel();
    }
}

async fn record_error(ctx: &Arc<RunCtx>, message: String) {
    ctx.state.lock().await.push_error(message);
}
