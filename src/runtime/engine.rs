/// DAG execution engine
///
/// Walks a compiled DAG from its source block. Pending activations sit in a
/// FIFO frontier; each step takes the next ready activation and, when that
/// block is parallel, every other ready parallel activation with it. The wave
/// runs concurrently, then the engine commits each result to the Context Store
/// in wave order and routes along the relations matching the outcome.
///
/// Blocks read the store only through snapshots taken before the wave started,
/// so a sibling never observes a half-committed result.

use crate::config::EngineConfig;
use crate::context::{
    config::ConfigResolver,
    dao::{CurrentInvocation, Dao},
    response::{BlockError, BlockResponse, DataFlowRecord, SuccessRange},
    store::{Commit, ContextStore},
};
use crate::runtime::{
    block::BlockContext,
    blocks::select_path,
    executor::{invoke, BlockRegistry, InvocationOutcome},
};
use crate::workflow::{
    registry::CompiledDag,
    types::{ApiRequest, BlockConfig, Relation},
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Relation taken on success
pub const SUCCESS_RELATION: &str = "success";
/// Relation taken on failure
pub const FAILURE_RELATION: &str = "failure";
/// Relation taken on either outcome
pub const ALWAYS_RELATION: &str = "always";

/// Runtime limits of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Activations allowed per block per run
    pub max_visits: u32,
    /// Default per-invocation timeout; blocks may override it
    pub block_timeout: Option<Duration>,
    pub success: SuccessRange,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_visits: 16,
            block_timeout: Some(Duration::from_secs(30)),
            success: SuccessRange::default(),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_visits: config.max_visits,
            block_timeout: (config.block_timeout_ms > 0)
                .then(|| Duration::from_millis(config.block_timeout_ms)),
            success: SuccessRange::new(config.success_min, config.success_max),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunCompletion {
    /// Every reachable frontier reached a terminal state
    Completed,
    /// Cancelled; activations still pending were dropped
    Cancelled,
}

/// Outcome of one activation, from `isSuccess` semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// One executed activation, in commit order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub wave: usize,
    pub block: String,
    /// 1-based activation count of this block
    pub visit: u32,
    pub routed_from: Option<String>,
    pub outcome: Outcome,
    pub statuses: Vec<u16>,
    pub routed_to: Vec<String>,
    pub elapsed_ms: u64,
    /// The revisit budget was exhausted and the block was not executed
    pub cycle_detected: bool,
}

/// Final state of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dag_id: String,
    pub completion: RunCompletion,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trace: Vec<TraceEntry>,
    store: Arc<ContextStore>,
}

impl RunReport {
    /// Read API over the final Context Store
    pub fn dao(&self) -> Dao {
        self.store.dao()
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn visited_blocks(&self) -> Vec<String> {
        self.store.visited_blocks()
    }

    pub fn cycle_detected(&self) -> bool {
        self.trace.iter().any(|t| t.cycle_detected)
    }

    /// Per-block status history and errors; the caller derives any verdict
    pub fn summary(&self) -> Value {
        let dao = self.dao();
        let blocks: serde_json::Map<String, Value> = self
            .visited_blocks()
            .into_iter()
            .map(|name| {
                let responses = dao.get_block_out(&name).unwrap_or_default();
                let entry = json!({
                    "success": dao.is_success(&name),
                    "statuses": responses.iter().map(|r| r.status).collect::<Vec<_>>(),
                    "errors": responses.iter().map(|r| r.error.clone()).collect::<Vec<_>>(),
                    "bodies": responses.iter().map(|r| r.body.clone()).collect::<Vec<_>>(),
                });
                (name, entry)
            })
            .collect();

        json!({
            "runId": self.run_id,
            "dagId": self.dag_id,
            "completion": self.completion,
            "startedAt": self.started_at,
            "finishedAt": self.finished_at,
            "cycleDetected": self.cycle_detected(),
            "blocks": blocks,
            "dataFlows": self.store.data_flows(),
            "trace": self.trace,
        })
    }
}

/// A scheduled, not yet executed, block activation
#[derive(Debug, Clone)]
struct Activation {
    block: String,
    /// Upstream data the block is invoked with
    input: Value,
    /// Responses of the upstream block(s) that routed here
    upstream: Vec<BlockResponse>,
    routed_from: Option<String>,
}

struct Finished {
    input: Value,
    responses: Vec<BlockResponse>,
    data_flows: Vec<DataFlowRecord>,
    elapsed: Duration,
    cycle_detected: bool,
}

/// DAG execution engine
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    blocks: Arc<BlockRegistry>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(blocks: Arc<BlockRegistry>, settings: EngineSettings) -> Self {
        Self { blocks, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run `dag` without external cancellation
    pub async fn execute_to_completion(
        &self,
        dag: &CompiledDag,
        request: ApiRequest,
        config: Arc<ConfigResolver>,
    ) -> RunReport {
        self.execute(dag, request, config, &CancellationToken::new()).await
    }

    /// Run `dag` starting at its source with `request` as input
    ///
    /// Block failures never abort the run; they are routed or end their
    /// branch. Cancellation stops scheduling, but the wave in flight still
    /// commits.
    pub async fn execute(
        &self,
        dag: &CompiledDag,
        request: ApiRequest,
        config: Arc<ConfigResolver>,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started_at = Utc::now();
        let run_start = Instant::now();
        let store = Arc::new(ContextStore::new(request.clone(), self.settings.success, config));
        let source = dag.source();

        tracing::info!(
            "🚀 Starting run {} of DAG '{}' at source '{}'",
            store.run_id(),
            dag.id,
            source.name
        );

        let mut frontier = VecDeque::from([Activation {
            block: source.name.clone(),
            input: request.to_value(),
            upstream: Vec::new(),
            routed_from: None,
        }]);
        let mut visits: HashMap<String, u32> = HashMap::new();
        let mut trace = Vec::new();
        let mut completion = RunCompletion::Completed;
        let mut wave_no = 0;

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "🛑 Run {} cancelled with {} pending activation(s)",
                    store.run_id(),
                    frontier.len()
                );
                completion = RunCompletion::Cancelled;
                break;
            }

            wave_no += 1;
            let mut wave = Vec::new();
            for activation in next_wave(dag, &mut frontier, &store.dao()) {
                let Some(config) = dag.block(&activation.block).cloned() else {
                    tracing::error!("❌ Activation for unknown block '{}' dropped", activation.block);
                    continue;
                };
                let visit = visits.entry(activation.block.clone()).or_insert(0);
                *visit += 1;
                wave.push((activation, config, *visit));
            }

            tracing::debug!(
                "🌊 Wave {}: {:?}",
                wave_no,
                wave.iter().map(|(a, _, _)| a.block.as_str()).collect::<Vec<_>>()
            );

            let finished = join_all(
                wave.iter()
                    .map(|(activation, config, visit)| self.run_activation(config, activation, *visit, &store)),
            )
            .await;

            for ((activation, config, visit), finished) in wave.into_iter().zip(finished) {
                let outcome = if finished
                    .responses
                    .iter()
                    .all(|r| r.is_success(self.settings.success))
                {
                    Outcome::Succeeded
                } else {
                    Outcome::Failed
                };
                let statuses: Vec<u16> = finished.responses.iter().map(|r| r.status).collect();

                // An exhausted revisit budget ends the branch whatever the relations say
                let relations = if finished.cycle_detected {
                    tracing::warn!("🔁 Not routing from '{}' after visit {}", config.name, visit);
                    Vec::new()
                } else {
                    matching_relations(&config, outcome, &finished.responses, self.settings.success)
                };
                let next_input = routed_input(&finished.responses, config.strategy.is_bulk());

                store.commit(Commit {
                    block: config.name.clone(),
                    input: finished.input,
                    responses: finished.responses.clone(),
                    data_flows: finished.data_flows,
                });

                tracing::info!(
                    "📍 Block '{}' (visit {}) {:?} with status {:?} in {:?}",
                    config.name,
                    visit,
                    outcome,
                    statuses,
                    finished.elapsed
                );

                let mut routed_to = Vec::new();
                for relation in relations {
                    tracing::debug!("➡️ '{}' --{}--> '{}'", config.name, relation.name, relation.target);
                    schedule(
                        &mut frontier,
                        Activation {
                            block: relation.target.clone(),
                            input: next_input.clone(),
                            upstream: finished.responses.clone(),
                            routed_from: Some(config.name.clone()),
                        },
                    );
                    routed_to.push(relation.target.clone());
                }
                if routed_to.is_empty() {
                    tracing::debug!("🏁 Branch ends at '{}'", config.name);
                }

                trace.push(TraceEntry {
                    wave: wave_no,
                    block: config.name.clone(),
                    visit,
                    routed_from: activation.routed_from,
                    outcome,
                    statuses,
                    routed_to,
                    elapsed_ms: saturating_millis(finished.elapsed),
                    cycle_detected: finished.cycle_detected,
                });
            }
        }

        tracing::info!(
            "🎉 Run {} of DAG '{}' {:?} after {} activation(s) in {:?}",
            store.run_id(),
            dag.id,
            completion,
            trace.len(),
            run_start.elapsed()
        );

        RunReport {
            run_id: store.run_id(),
            dag_id: dag.id.clone(),
            completion,
            started_at,
            finished_at: Utc::now(),
            trace,
            store,
        }
    }

    async fn run_activation(
        &self,
        config: &Arc<BlockConfig>,
        activation: &Activation,
        visit: u32,
        store: &ContextStore,
    ) -> Finished {
        let started = Instant::now();
        let name = config.name.as_str();

        if visit > self.settings.max_visits {
            tracing::warn!(
                "🔁 Block '{}' exceeded its revisit budget of {}",
                name,
                self.settings.max_visits
            );
            return Finished {
                input: activation.input.clone(),
                responses: vec![BlockResponse::failed(
                    name,
                    BlockError::cycle_detected(name, self.settings.max_visits),
                )],
                data_flows: Vec::new(),
                elapsed: started.elapsed(),
                cycle_detected: true,
            };
        }

        let input = match &config.input_path {
            Some(path) => match select_path(&activation.input, path) {
                Ok(selected) => selected,
                Err(e) => {
                    return Finished {
                        input: activation.input.clone(),
                        responses: vec![BlockResponse::failed(name, BlockError::new(400, e))],
                        data_flows: Vec::new(),
                        elapsed: started.elapsed(),
                        cycle_detected: false,
                    }
                }
            },
            None => activation.input.clone(),
        };

        let block = self.blocks.resolve(config.block_type());
        let timeout = config.timeout.or(self.settings.block_timeout);
        let context = |scalar: Value| {
            let dao = Dao::new(
                store.snapshot(),
                Arc::clone(store.config()),
                Some(CurrentInvocation {
                    block: name.to_string(),
                    input: input.clone(),
                }),
            );
            BlockContext::new(Arc::clone(config), scalar, activation.upstream.clone(), dao)
        };

        tracing::debug!("▶️ Running '{}' ({})", name, config.block_type());

        let outcomes: Vec<InvocationOutcome> = if config.strategy.is_bulk() {
            let elements = match &input {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            tracing::debug!("📦 Bulk '{}' over {} element(s)", name, elements.len());

            let contexts: Vec<BlockContext> = elements
                .into_iter()
                .enumerate()
                .map(|(i, element)| context(element).for_element(i))
                .collect();

            if config.strategy.is_parallel() {
                join_all(contexts.into_iter().map(|ctx| invoke(block.clone(), ctx, timeout))).await
            } else {
                let mut outcomes = Vec::with_capacity(contexts.len());
                for ctx in contexts {
                    outcomes.push(invoke(block.clone(), ctx, timeout).await);
                }
                outcomes
            }
        } else {
            vec![invoke(block, context(input.clone()), timeout).await]
        };

        let mut responses = Vec::new();
        let mut data_flows = Vec::new();
        for outcome in outcomes {
            responses.extend(outcome.responses);
            data_flows.extend(outcome.data_flows);
        }

        Finished {
            input,
            responses,
            data_flows,
            elapsed: started.elapsed(),
            cycle_detected: false,
        }
    }
}

/// Take the next wave of activations off the frontier
///
/// An activation is ready once every `dependsOn` block has been visited. When
/// nothing is ready the oldest activation is released anyway so the run always
/// progresses.
fn next_wave(dag: &CompiledDag, frontier: &mut VecDeque<Activation>, dao: &Dao) -> Vec<Activation> {
    let ready = |activation: &Activation| {
        dag.block(&activation.block)
            .map(|b| b.depends_on.iter().all(|d| dao.has_block_been_visited(d)))
            .unwrap_or(true)
    };
    let parallel = |activation: &Activation| {
        dag.block(&activation.block)
            .map(|b| b.strategy.is_parallel())
            .unwrap_or(false)
    };

    let position = match frontier.iter().position(|a| ready(a)) {
        Some(position) => position,
        None => {
            if let Some(oldest) = frontier.front() {
                tracing::warn!(
                    "⛓️ Every pending block waits on dependencies; releasing '{}'",
                    oldest.block
                );
            }
            0
        }
    };
    let Some(first) = frontier.remove(position) else {
        return Vec::new();
    };

    let mut wave = vec![first];
    if parallel(&wave[0]) {
        let mut i = 0;
        while i < frontier.len() {
            let candidate = &frontier[i];
            let joins = parallel(candidate)
                && ready(candidate)
                && !wave.iter().any(|a| a.block == candidate.block);
            if joins {
                if let Some(activation) = frontier.remove(i) {
                    wave.push(activation);
                }
            } else {
                i += 1;
            }
        }
    }
    wave
}

/// Queue an activation, merging it into a pending one for the same block
fn schedule(frontier: &mut VecDeque<Activation>, activation: Activation) {
    match frontier.iter_mut().find(|a| a.block == activation.block) {
        Some(pending) => {
            tracing::debug!(
                "🔀 Joining route from {:?} into pending '{}'",
                activation.routed_from,
                pending.block
            );
            pending.upstream.extend(activation.upstream);
        }
        None => frontier.push_back(activation),
    }
}

/// Relations of `config` selected by `outcome`, in declaration order
///
/// `success` matches a success, `failure` a failure, a relation named after a
/// failing status or error code (e.g. "502") that failure, and `always` both.
fn matching_relations<'a>(
    config: &'a BlockConfig,
    outcome: Outcome,
    responses: &[BlockResponse],
    success: SuccessRange,
) -> Vec<&'a Relation> {
    if config.terminal {
        return Vec::new();
    }

    let failing_codes: HashSet<String> = responses
        .iter()
        .filter(|r| !r.is_success(success))
        .map(|r| r.error.as_ref().map_or(r.status, |e| e.code).to_string())
        .collect();

    config
        .relations
        .iter()
        .filter(|relation| {
            let name = relation.name.as_str();
            if name.eq_ignore_ascii_case(ALWAYS_RELATION) {
                true
            } else if name.eq_ignore_ascii_case(SUCCESS_RELATION) {
                outcome == Outcome::Succeeded
            } else if name.eq_ignore_ascii_case(FAILURE_RELATION) {
                outcome == Outcome::Failed
            } else {
                outcome == Outcome::Failed && failing_codes.contains(name)
            }
        })
        .collect()
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Data handed to successors
///
/// A bulk block always hands on the array of its element bodies, whatever the
/// element count; any other block hands on the body of its single response.
fn routed_input(responses: &[BlockResponse], bulk: bool) -> Value {
    match responses {
        [single] if !bulk => single.body.clone(),
        many => Value::Array(many.iter().map(|r| r.body.clone()).collect()),
    }
}
