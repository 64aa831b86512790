/// Values blocks hand back to the engine
///
/// A `BlockResponse` is created once per invocation and becomes immutable the
/// moment the engine commits it. Failures are data: a populated `error` field,
/// never a panic or a Rust error crossing the engine boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Status code synthesized when an invocation exceeds its timeout
pub const TIMEOUT_STATUS: u16 = 504;
/// Status code synthesized when a block exhausts its revisit budget
pub const CYCLE_DETECTED_STATUS: u16 = 508;

/// Error payload of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockError {
    pub code: u16,
    pub message: String,
}

impl BlockError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn timeout(block: &str, after: Duration) -> Self {
        Self::new(
            TIMEOUT_STATUS,
            format!("Timeout: block '{}' did not finish within {:?}", block, after),
        )
    }

    pub fn cycle_detected(block: &str, max_visits: u32) -> Self {
        Self::new(
            CYCLE_DETECTED_STATUS,
            format!(
                "CycleDetected: block '{}' exceeded its budget of {} visits",
                block, max_visits
            ),
        )
    }
}

/// Result of one block invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub block_name: String,
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BlockError>,
}

impl BlockResponse {
    /// Successful response with status 200
    pub fn ok(block_name: impl Into<String>, body: Value) -> Self {
        Self::with_status(block_name, 200, body)
    }

    pub fn with_status(block_name: impl Into<String>, status: u16, body: Value) -> Self {
        Self {
            block_name: block_name.into(),
            status,
            body,
            error: None,
        }
    }

    /// Failed response; the status mirrors the error code
    pub fn failed(block_name: impl Into<String>, error: BlockError) -> Self {
        Self {
            block_name: block_name.into(),
            status: error.code,
            body: Value::Null,
            error: Some(error),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Status inside the success range and no error payload
    pub fn is_success(&self, range: SuccessRange) -> bool {
        self.error.is_none() && range.contains(self.status)
    }
}

/// What `Block::execute` returns: one response, or one per bulk element
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutput {
    Single(BlockResponse),
    Bulk(Vec<BlockResponse>),
}

impl BlockOutput {
    pub fn into_responses(self) -> Vec<BlockResponse> {
        match self {
            BlockOutput::Single(response) => vec![response],
            BlockOutput::Bulk(responses) => responses,
        }
    }
}

impl From<BlockResponse> for BlockOutput {
    fn from(response: BlockResponse) -> Self {
        BlockOutput::Single(response)
    }
}

impl From<Vec<BlockResponse>> for BlockOutput {
    fn from(responses: Vec<BlockResponse>) -> Self {
        BlockOutput::Bulk(responses)
    }
}

/// Inclusive status range that counts as success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRange {
    pub min: u16,
    pub max: u16,
}

impl SuccessRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

impl Default for SuccessRange {
    fn default() -> Self {
        Self { min: 200, max: 299 }
    }
}

/// Terminal state of a data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFlowStatus {
    Completed,
    Failed,
}

/// Correlation record of an external or asynchronous operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowRecord {
    pub flow_id: String,
    #[serde(default)]
    pub data: Value,
    pub status: DataFlowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BlockError>,
}

impl DataFlowRecord {
    pub fn completed(flow_id: impl Into<String>, data: Value) -> Self {
        Self {
            flow_id: flow_id.into(),
            data,
            status: DataFlowStatus::Completed,
            error: None,
        }
    }

    pub fn failed(flow_id: impl Into<String>, data: Value, error: BlockError) -> Self {
        Self {
            flow_id: flow_id.into(),
            data,
            status: DataFlowStatus::Failed,
            error: Some(error),
        }
    }

    pub fn has_error(&self) -> bool {
        self.status == DataFlowStatus::Failed || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_needs_range_and_no_error() {
        let range = SuccessRange::default();
        assert!(BlockResponse::ok("a", json!(1)).is_success(range));
        assert!(!BlockResponse::with_status("a", 404, json!(null)).is_success(range));

        let mut flagged = BlockResponse::ok("a", json!(1));
        flagged.error = Some(BlockError::new(200, "soft failure"));
        assert!(!flagged.is_success(range));

        assert!(BlockResponse::with_status("a", 302, json!(null)).is_success(SuccessRange::new(200, 399)));
    }

    #[test]
    fn failed_response_mirrors_error_code() {
        let response = BlockResponse::failed("b", BlockError::new(502, "upstream down"));
        assert_eq!(response.status, 502);
        assert_eq!(response.body, Value::Null);

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["blockName"], "b");
        assert_eq!(wire["error"]["code"], 502);
    }

    #[test]
    fn data_flow_status_wire_format() {
        let record = DataFlowRecord::completed("f1", json!({ "id": 7 }));
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["status"], "COMPLETED");
        assert!(!record.has_error());
    }
}
