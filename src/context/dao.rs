/// DAO: the read-only query surface over a run's context
///
/// Every running block gets its own `Dao`, built over the snapshot taken when
/// its invocation started. Lookups are by block name or flow id and never
/// mutate anything; repeating a query without new commits gives the same answer.

use crate::context::{
    config::{ConfigEntry, ConfigResolver},
    response::{BlockError, BlockResponse, DataFlowRecord, DataFlowStatus},
    store::{ContextSnapshot, Recorded},
};
use crate::error::DaoError;
use crate::workflow::types::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Body/error pair projected from a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyEntry {
    pub neo_body: Value,
    pub neo_error: Option<BlockError>,
}

impl From<&BlockResponse> for BodyEntry {
    fn from(response: &BlockResponse) -> Self {
        Self {
            neo_body: response.body.clone(),
            neo_error: response.error.clone(),
        }
    }
}

/// The invocation a `Dao` was handed to
#[derive(Debug, Clone)]
pub struct CurrentInvocation {
    pub block: String,
    pub input: Value,
}

/// Read handle over one context snapshot
#[derive(Debug, Clone)]
pub struct Dao {
    snapshot: ContextSnapshot,
    config: Arc<ConfigResolver>,
    current: Option<CurrentInvocation>,
}

impl Dao {
    pub fn new(
        snapshot: ContextSnapshot,
        config: Arc<ConfigResolver>,
        current: Option<CurrentInvocation>,
    ) -> Self {
        Self {
            snapshot,
            config,
            current,
        }
    }

    pub fn api_request(&self) -> &ApiRequest {
        &self.snapshot.state.api_request
    }

    /// Block the handle was issued to, if any
    pub fn current_block(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.block.as_str())
    }

    fn history(&self, name: &str) -> Result<&[Recorded<BlockResponse>], DaoError> {
        self.snapshot
            .state
            .outputs
            .get(name)
            .map(|history| history.as_slice())
            .ok_or_else(|| DaoError::NotVisited(name.to_string()))
    }

    fn first(&self, name: &str) -> Result<&BlockResponse, DaoError> {
        self.history(name)?
            .first()
            .map(|r| &r.value)
            .ok_or_else(|| DaoError::EmptyHistory(name.to_string()))
    }

    /// All responses of `name`, in invocation order
    pub fn get_block_out(&self, name: &str) -> Result<Vec<BlockResponse>, DaoError> {
        Ok(self.history(name)?.iter().map(|r| r.value.clone()).collect())
    }

    pub fn has_block_been_visited(&self, name: &str) -> bool {
        self.snapshot.state.outputs.contains_key(name)
    }

    /// The input a block was invoked with (not its output)
    ///
    /// `None` means the block holding this handle. For a block visited several
    /// times the most recent input is returned.
    pub fn get_out(&self, name: Option<&str>) -> Result<Value, DaoError> {
        if let Some(current) = &self.current {
            if name.is_none() || name == Some(current.block.as_str()) {
                return Ok(current.input.clone());
            }
        }

        let name = name.unwrap_or_default();
        self.snapshot
            .state
            .inputs
            .get(name)
            .and_then(|inputs| inputs.last())
            .map(|r| r.value.clone())
            .ok_or_else(|| DaoError::NotVisited(name.to_string()))
    }

    pub fn get_status(&self, name: &str) -> Result<u16, DaoError> {
        Ok(self.first(name)?.status)
    }

    pub fn get_multi_status(&self, name: &str) -> Result<Vec<u16>, DaoError> {
        Ok(self.history(name)?.iter().map(|r| r.value.status).collect())
    }

    pub fn get_error(&self, name: &str) -> Result<Option<BlockError>, DaoError> {
        Ok(self.first(name)?.error.clone())
    }

    pub fn get_multi_error(&self, name: &str) -> Result<Vec<Option<BlockError>>, DaoError> {
        Ok(self
            .history(name)?
            .iter()
            .map(|r| r.value.error.clone())
            .collect())
    }

    /// Whether any recorded response of `name` carries an error
    pub fn has_error(&self, name: &str) -> bool {
        self.history(name)
            .map(|h| h.iter().any(|r| r.value.error.is_some()))
            .unwrap_or(false)
    }

    /// Every recorded response succeeded; false for an unvisited block
    pub fn is_success(&self, name: &str) -> bool {
        let range = self.snapshot.success;
        self.history(name)
            .map(|h| h.iter().all(|r| r.value.is_success(range)))
            .unwrap_or(false)
    }

    pub fn get_body(&self, name: &str) -> Result<BodyEntry, DaoError> {
        Ok(BodyEntry::from(self.first(name)?))
    }

    pub fn get_multi_body(&self, name: &str) -> Result<Vec<BodyEntry>, DaoError> {
        Ok(self
            .history(name)?
            .iter()
            .map(|r| BodyEntry::from(&r.value))
            .collect())
    }

    fn flow(&self, flow_id: &str) -> Result<&DataFlowRecord, DaoError> {
        self.snapshot
            .state
            .flows
            .get(flow_id)
            .map(|r| &r.value)
            .ok_or_else(|| DaoError::UnknownFlow(flow_id.to_string()))
    }

    fn latest_flow(&self) -> Result<&DataFlowRecord, DaoError> {
        let state = &self.snapshot.state;
        state
            .flow_order
            .last()
            .and_then(|id| state.flows.get(id))
            .map(|r| &r.value)
            .ok_or(DaoError::NoDataFlows)
    }

    pub fn get_data_flow_out(&self, flow_id: &str) -> Result<DataFlowRecord, DaoError> {
        self.flow(flow_id).cloned()
    }

    pub fn get_latest_data_flow_out(&self) -> Result<DataFlowRecord, DaoError> {
        self.latest_flow().cloned()
    }

    pub fn get_data_flow_body(&self, flow_id: &str) -> Result<Value, DaoError> {
        Ok(self.flow(flow_id)?.data.clone())
    }

    pub fn get_latest_data_flow_body(&self) -> Result<Value, DaoError> {
        Ok(self.latest_flow()?.data.clone())
    }

    pub fn does_data_flow_has_error(&self, flow_id: &str) -> Result<bool, DaoError> {
        Ok(self.flow(flow_id)?.has_error())
    }

    pub fn get_data_flow_error(&self, flow_id: &str) -> Result<Option<BlockError>, DaoError> {
        Ok(self.flow(flow_id)?.error.clone())
    }

    pub fn get_latest_data_flow_status(&self) -> Result<DataFlowStatus, DaoError> {
        Ok(self.latest_flow()?.status)
    }

    pub fn get_latest_data_flow_error(&self) -> Result<Option<BlockError>, DaoError> {
        Ok(self.latest_flow()?.error.clone())
    }

    pub async fn get_value_by_key(&self, key: &str) -> Result<ConfigEntry, DaoError> {
        self.config.value_by_key(key).await
    }

    pub async fn get_parent_value_by_key(&self, key: &str) -> Result<ConfigEntry, DaoError> {
        self.config.parent_value_by_key(key).await
    }
}
