/// Core DAG definition types
///
/// Two layers live here: the declarative authoring document (`DagDocument`,
/// `BlockDocument`) exactly as external tooling produces it, and the typed
/// `BlockConfig` the engine runs once a document has been compiled. Block
/// parameters are a closed tagged union so every variant keeps its own typed
/// payload while the engine stays variant-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, fmt, time::Duration};

/// Declarative DAG document as stored and exchanged over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagDocument {
    /// Unique DAG identifier (e.g., "dag-payments")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Block definitions; order is preserved for deterministic routing
    pub blocks: Vec<BlockDocument>,
}

impl DagDocument {
    /// Parse a document from its JSON text
    pub fn from_json(text: &str) -> Result<Self, crate::error::ConfigError> {
        serde_json::from_str(text).map_err(|e| crate::error::ConfigError::Malformed(e.to_string()))
    }
}

/// One block as written by DAG authors
///
/// `type` and `params` stay untyped at this layer so an unknown type can be
/// reported as a configuration error instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub source: bool,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Blocks that must have been visited before this one becomes ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Ends the run segment regardless of outcome
    #[serde(default)]
    pub terminal: bool,
    /// Per-invocation timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// JSONPath selecting the scalar input (or bulk collection) from upstream data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
}

/// Named directed edge, selected by the outcome of its owning block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub target: String,
}

/// Whether a ready block may share a wave with other ready blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    #[default]
    Sequential,
    Parallel,
}

/// Whether a block runs once, or once per element of its input collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invocation {
    #[default]
    Scalar,
    Bulk,
}

/// Execution strategy of a block
///
/// Accepts the detailed object form or a shorthand string such as
/// `"parallel"`, `"bulk"` or `"parallel-bulk"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StrategyRepr")]
pub struct ExecutionStrategy {
    pub scheduling: Scheduling,
    pub invocation: Invocation,
}

impl ExecutionStrategy {
    pub fn new(scheduling: Scheduling, invocation: Invocation) -> Self {
        Self {
            scheduling,
            invocation,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.scheduling == Scheduling::Parallel
    }

    pub fn is_bulk(&self) -> bool {
        self.invocation == Invocation::Bulk
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrategyRepr {
    Named(String),
    Detailed {
        #[serde(default)]
        scheduling: Scheduling,
        #[serde(default)]
        invocation: Invocation,
    },
}

impl TryFrom<StrategyRepr> for ExecutionStrategy {
    type Error = String;

    fn try_from(repr: StrategyRepr) -> Result<Self, Self::Error> {
        match repr {
            StrategyRepr::Detailed {
                scheduling,
                invocation,
            } => Ok(Self::new(scheduling, invocation)),
            StrategyRepr::Named(name) => {
                let mut strategy = Self::default();
                for part in name.split(['-', '+', ',', ' ']).filter(|p| !p.is_empty()) {
                    match part.to_ascii_lowercase().as_str() {
                        "sequential" => strategy.scheduling = Scheduling::Sequential,
                        "parallel" => strategy.scheduling = Scheduling::Parallel,
                        "scalar" => strategy.invocation = Invocation::Scalar,
                        "bulk" => strategy.invocation = Invocation::Bulk,
                        other => return Err(format!("unknown execution strategy '{}'", other)),
                    }
                }
                Ok(strategy)
            }
        }
    }
}

/// Block type tag, one per `BlockKind` variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Script,
    #[serde(rename = "APIRequest")]
    ApiRequest,
    Schema,
    Encrypt,
    Decrypt,
    #[serde(rename = "MongoDB")]
    MongoDb,
    #[serde(rename = "HMAC")]
    Hmac,
    Kafka,
    RedisEvict,
    OrgContextSwitch,
    #[serde(rename = "OAuth")]
    OAuth,
    BlockLibrary,
    ValidateSignature,
}

impl BlockType {
    pub const ALL: [BlockType; 13] = [
        BlockType::Script,
        BlockType::ApiRequest,
        BlockType::Schema,
        BlockType::Encrypt,
        BlockType::Decrypt,
        BlockType::MongoDb,
        BlockType::Hmac,
        BlockType::Kafka,
        BlockType::RedisEvict,
        BlockType::OrgContextSwitch,
        BlockType::OAuth,
        BlockType::BlockLibrary,
        BlockType::ValidateSignature,
    ];

    /// Name used in DAG documents
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Script => "Script",
            BlockType::ApiRequest => "APIRequest",
            BlockType::Schema => "Schema",
            BlockType::Encrypt => "Encrypt",
            BlockType::Decrypt => "Decrypt",
            BlockType::MongoDb => "MongoDB",
            BlockType::Hmac => "HMAC",
            BlockType::Kafka => "Kafka",
            BlockType::RedisEvict => "RedisEvict",
            BlockType::OrgContextSwitch => "OrgContextSwitch",
            BlockType::OAuth => "OAuth",
            BlockType::BlockLibrary => "BlockLibrary",
            BlockType::ValidateSignature => "ValidateSignature",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed block parameters, tagged by block type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum BlockKind {
    /// Expected params: { "script": "return { doubled = input.n * 2 }" }
    Script(ScriptParams),
    /// Expected params: { "url": "https://api.example.com", "method": "POST" }
    #[serde(rename = "APIRequest")]
    ApiRequest(ApiRequestParams),
    /// Expected params: { "schema": { "type": "object", "required": ["id"] } }
    Schema(SchemaParams),
    Encrypt(CryptoParams),
    Decrypt(CryptoParams),
    #[serde(rename = "MongoDB")]
    MongoDb(MongoParams),
    #[serde(rename = "HMAC")]
    Hmac(HmacParams),
    Kafka(KafkaParams),
    RedisEvict(RedisEvictParams),
    OrgContextSwitch(OrgContextSwitchParams),
    #[serde(rename = "OAuth")]
    OAuth(OAuthParams),
    BlockLibrary(BlockLibraryParams),
    ValidateSignature(SignatureParams),
}

impl BlockKind {
    /// Build typed params from a document's `type` tag and raw `params`
    ///
    /// Returns `None` for an unknown tag, `Some(Err)` for params that do not
    /// match the variant's shape.
    pub fn from_parts(block_type: &str, params: &Value) -> Option<Result<Self, String>> {
        BlockType::from_name(block_type)?;
        let params = if params.is_null() { json!({}) } else { params.clone() };
        let tagged = json!({ "type": block_type, "params": params });
        Some(serde_json::from_value(tagged).map_err(|e| e.to_string()))
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            BlockKind::Script(_) => BlockType::Script,
            BlockKind::ApiRequest(_) => BlockType::ApiRequest,
            BlockKind::Schema(_) => BlockType::Schema,
            BlockKind::Encrypt(_) => BlockType::Encrypt,
            BlockKind::Decrypt(_) => BlockType::Decrypt,
            BlockKind::MongoDb(_) => BlockType::MongoDb,
            BlockKind::Hmac(_) => BlockType::Hmac,
            BlockKind::Kafka(_) => BlockType::Kafka,
            BlockKind::RedisEvict(_) => BlockType::RedisEvict,
            BlockKind::OrgContextSwitch(_) => BlockType::OrgContextSwitch,
            BlockKind::OAuth(_) => BlockType::OAuth,
            BlockKind::BlockLibrary(_) => BlockType::BlockLibrary,
            BlockKind::ValidateSignature(_) => BlockType::ValidateSignature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptParams {
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestParams {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSONPath into the scalar input used as the request body
    #[serde(default)]
    pub body_path: Option<String>,
    /// Register the call as a data flow correlated by a fresh flow id
    #[serde(default)]
    pub track_flow: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaParams {
    pub schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoParams {
    pub algorithm: String,
    /// Config key holding the key material
    pub key_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParams {
    /// find, insertOne, updateOne, deleteOne, ...
    pub operation: String,
    pub collection: String,
    #[serde(default)]
    pub filter: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmacParams {
    pub algorithm: String,
    pub key_ref: String,
    #[serde(default)]
    pub header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaParams {
    pub topic: String,
    #[serde(default)]
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisEvictParams {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgContextSwitchParams {
    pub org_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthParams {
    pub provider: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLibraryParams {
    pub library: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureParams {
    pub algorithm: String,
    pub key_ref: String,
    pub header: String,
}

/// Compiled, immutable configuration of one block
#[derive(Debug, Clone)]
pub struct BlockConfig {
    pub name: String,
    pub kind: BlockKind,
    pub source: bool,
    pub strategy: ExecutionStrategy,
    pub relations: Vec<Relation>,
    pub depends_on: Vec<String>,
    pub terminal: bool,
    pub timeout: Option<Duration>,
    pub input_path: Option<String>,
}

impl BlockConfig {
    pub fn block_type(&self) -> BlockType {
        self.kind.block_type()
    }
}

/// The external request a run starts from
///
/// Serialized form is the source block's scalar input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl ApiRequest {
    /// Request carrying only a JSON body
    pub fn from_body(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
