/// Per-run Context Store
///
/// Holds everything a run accumulates: the external request, the input and
/// response history of every block, data-flow records and the config resolver.
/// The store is append-only and every write is stamped with a monotonically
/// increasing sequence number.
///
/// State lives behind an `ArcSwap`: a commit builds the next state and swaps
/// the pointer in one step, so a reader holding a snapshot never sees a
/// half-written invocation. Only the engine writes; blocks get a `Dao` over a
/// snapshot taken when their invocation started.

use crate::context::{
    config::ConfigResolver,
    dao::Dao,
    response::{BlockOutput, BlockResponse, DataFlowRecord, SuccessRange},
};
use crate::workflow::types::ApiRequest;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// A value plus its write stamp
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recorded<T> {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub value: T,
}

/// Immutable state of a run at one point in its sequence
///
/// Each history sits behind its own `Arc`, so building the next state copies
/// only the histories a write touches.
#[derive(Debug, Clone, Default)]
pub struct ContextState {
    pub(crate) api_request: Arc<ApiRequest>,
    pub(crate) outputs: HashMap<String, Arc<Vec<Recorded<BlockResponse>>>>,
    pub(crate) inputs: HashMap<String, Arc<Vec<Recorded<Value>>>>,
    pub(crate) flows: Arc<HashMap<String, Recorded<DataFlowRecord>>>,
    pub(crate) flow_order: Arc<Vec<String>>,
    pub(crate) next_seq: u64,
}

impl ContextState {
    fn stamp<T>(&mut self, value: T) -> Recorded<T> {
        let seq = self.next_seq;
        self.next_seq += 1;
        Recorded {
            seq,
            recorded_at: Utc::now(),
            value,
        }
    }

    fn append_responses(&mut self, block: &str, responses: Vec<BlockResponse>) {
        let stamped: Vec<_> = responses.into_iter().map(|r| self.stamp(r)).collect();
        // Visited-but-empty still marks the block as visited
        let history = self.outputs.entry(block.to_string()).or_default();
        Arc::make_mut(history).extend(stamped);
    }

    fn append_input(&mut self, block: &str, input: Value) {
        let stamped = self.stamp(input);
        let history = self.inputs.entry(block.to_string()).or_default();
        Arc::make_mut(history).push(stamped);
    }

    fn insert_flow(&mut self, record: DataFlowRecord) -> bool {
        if self.flows.contains_key(&record.flow_id) {
            tracing::warn!(
                "⚠️ Ignoring duplicate data flow registration: {}",
                record.flow_id
            );
            return false;
        }
        let flow_id = record.flow_id.clone();
        let stamped = self.stamp(record);
        Arc::make_mut(&mut self.flows).insert(flow_id.clone(), stamped);
        Arc::make_mut(&mut self.flow_order).push(flow_id);
        true
    }
}

/// Everything one finished invocation writes, committed atomically
#[derive(Debug, Clone)]
pub struct Commit {
    pub block: String,
    pub input: Value,
    pub responses: Vec<BlockResponse>,
    pub data_flows: Vec<DataFlowRecord>,
}

/// One write in the store's journal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum JournalEntry {
    Input {
        seq: u64,
        recorded_at: DateTime<Utc>,
        block: String,
    },
    Response {
        seq: u64,
        recorded_at: DateTime<Utc>,
        block: String,
        status: u16,
    },
    DataFlow {
        seq: u64,
        recorded_at: DateTime<Utc>,
        flow_id: String,
    },
}

impl JournalEntry {
    pub fn seq(&self) -> u64 {
        match self {
            JournalEntry::Input { seq, .. }
            | JournalEntry::Response { seq, .. }
            | JournalEntry::DataFlow { seq, .. } => *seq,
        }
    }
}

/// Frozen view of the store handed to readers
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub(crate) state: Arc<ContextState>,
    pub(crate) success: SuccessRange,
}

/// Mutable-by-engine state of one workflow run
#[derive(Debug)]
pub struct ContextStore {
    run_id: Uuid,
    state: ArcSwap<ContextState>,
    success: SuccessRange,
    config: Arc<ConfigResolver>,
}

impl ContextStore {
    pub fn new(api_request: ApiRequest, success: SuccessRange, config: Arc<ConfigResolver>) -> Self {
        let state = ContextState {
            api_request: Arc::new(api_request),
            ..ContextState::default()
        };
        Self {
            run_id: Uuid::new_v4(),
            state: ArcSwap::new(Arc::new(state)),
            success,
            config,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn success_range(&self) -> SuccessRange {
        self.success
    }

    pub fn config(&self) -> &Arc<ConfigResolver> {
        &self.config
    }

    /// Consistent view as of now; later commits are invisible to it
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            state: self.state.load_full(),
            success: self.success,
        }
    }

    /// Read API over the current state, not bound to any invocation
    pub fn dao(&self) -> Dao {
        Dao::new(self.snapshot(), Arc::clone(&self.config), None)
    }

    /// Append one or more responses to a block's history
    pub fn record_result(&self, block: &str, output: impl Into<BlockOutput>) {
        let responses = output.into().into_responses();
        self.state.rcu(|current| {
            let mut next = ContextState::clone(current);
            next.append_responses(block, responses.clone());
            next
        });
    }

    /// Register a data flow; returns false if the flow id is already taken
    pub fn register_data_flow(&self, record: DataFlowRecord) -> bool {
        let mut inserted = false;
        self.state.rcu(|current| {
            let mut next = ContextState::clone(current);
            inserted = next.insert_flow(record.clone());
            next
        });
        inserted
    }

    /// Commit an invocation's input, responses and data flows in one swap
    pub fn commit(&self, commit: Commit) {
        tracing::debug!(
            "💾 Committing {} response(s) and {} data flow(s) for '{}'",
            commit.responses.len(),
            commit.data_flows.len(),
            commit.block
        );
        self.state.rcu(|current| {
            let mut next = ContextState::clone(current);
            next.append_input(&commit.block, commit.input.clone());
            next.append_responses(&commit.block, commit.responses.clone());
            for record in &commit.data_flows {
                next.insert_flow(record.clone());
            }
            next
        });
    }

    /// Every write so far, ordered by sequence number
    pub fn journal(&self) -> Vec<JournalEntry> {
        let state = self.state.load();
        let mut entries = Vec::new();

        for (block, inputs) in &state.inputs {
            entries.extend(inputs.iter().map(|r| JournalEntry::Input {
                seq: r.seq,
                recorded_at: r.recorded_at,
                block: block.clone(),
            }));
        }
        for (block, responses) in &state.outputs {
            entries.extend(responses.iter().map(|r| JournalEntry::Response {
                seq: r.seq,
                recorded_at: r.recorded_at,
                block: block.clone(),
                status: r.value.status,
            }));
        }
        for record in state.flows.values() {
            entries.push(JournalEntry::DataFlow {
                seq: record.seq,
                recorded_at: record.recorded_at,
                flow_id: record.value.flow_id.clone(),
            });
        }

        entries.sort_by_key(JournalEntry::seq);
        entries
    }

    /// Data-flow records in registration order
    pub fn data_flows(&self) -> Vec<DataFlowRecord> {
        let state = self.state.load();
        state
            .flow_order
            .iter()
            .filter_map(|id| state.flows.get(id))
            .map(|r| r.value.clone())
            .collect()
    }

    /// Names of all blocks with recorded output
    pub fn visited_blocks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.load().outputs.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::response::BlockError;
    use serde_json::json;

    fn store() -> ContextStore {
        ContextStore::new(
            ApiRequest::from_body(json!({ "id": 1 })),
            SuccessRange::default(),
            Arc::new(ConfigResolver::empty()),
        )
    }

    #[test]
    fn record_result_appends_in_order() {
        let store = store();
        store.record_result("a", BlockResponse::ok("a", json!(1)));
        store.record_result(
            "a",
            vec![BlockResponse::ok("a", json!(2)), BlockResponse::ok("a", json!(3))],
        );

        let bodies: Vec<_> = store
            .dao()
            .get_block_out("a")
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_commits() {
        let store = store();
        let before = store.snapshot();
        store.commit(Commit {
            block: "a".into(),
            input: json!(null),
            responses: vec![BlockResponse::ok("a", json!("done"))],
            data_flows: vec![],
        });

        assert!(!before.state.outputs.contains_key("a"));
        assert!(store.snapshot().state.outputs.contains_key("a"));
    }

    #[test]
    fn commit_shares_untouched_histories() {
        let store = store();
        store.record_result("a", BlockResponse::ok("a", json!(1)));
        store.register_data_flow(DataFlowRecord::completed("f", json!(1)));
        let before = store.snapshot();

        store.commit(Commit {
            block: "b".into(),
            input: json!(null),
            responses: vec![BlockResponse::ok("b", json!(2))],
            data_flows: vec![],
        });
        let after = store.snapshot();

        assert!(Arc::ptr_eq(&before.state.outputs["a"], &after.state.outputs["a"]));
        assert!(Arc::ptr_eq(&before.state.flows, &after.state.flows));
        assert!(!before.state.outputs.contains_key("b"));

        store.record_result("a", BlockResponse::ok("a", json!(3)));
        assert_eq!(before.state.outputs["a"].len(), 1);
        assert_eq!(store.snapshot().state.outputs["a"].len(), 2);
    }

    #[test]
    fn empty_commit_still_marks_visited() {
        let store = store();
        store.record_result("bulk", Vec::<BlockResponse>::new());
        let dao = store.dao();
        assert!(dao.has_block_been_visited("bulk"));
        assert!(dao.get_block_out("bulk").unwrap().is_empty());
    }

    #[test]
    fn duplicate_flow_id_is_ignored() {
        let store = store();
        assert!(store.register_data_flow(DataFlowRecord::completed("f", json!(1))));
        assert!(!store.register_data_flow(DataFlowRecord::failed(
            "f",
            json!(2),
            BlockError::new(500, "late")
        )));
        assert_eq!(store.dao().get_data_flow_body("f").unwrap(), json!(1));
    }

    #[test]
    fn journal_is_sequence_ordered() {
        let store = store();
        store.commit(Commit {
            block: "a".into(),
            input: json!({ "x": 1 }),
            responses: vec![BlockResponse::ok("a", json!(1))],
            data_flows: vec![DataFlowRecord::completed("f1", json!(null))],
        });
        store.record_result("b", BlockResponse::ok("b", json!(2)));

        let journal = store.journal();
        let seqs: Vec<u64> = journal.iter().map(JournalEntry::seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert!(matches!(&journal[0], JournalEntry::Input { block, .. } if block == "a"));
        assert!(matches!(&journal[2], JournalEntry::DataFlow { flow_id, .. } if flow_id == "f1"));
        assert!(matches!(&journal[3], JournalEntry::Response { block, .. } if block == "b"));
    }
}
