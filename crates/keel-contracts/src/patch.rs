//! JSON patch operations (RFC 6902 shape).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One patch operation addressed by a JSON pointer.
///
/// Serializes to the wire form `{"op":"add","path":"/a","value":1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Test { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
}

impl PatchOperation {
    /// The target pointer of this operation.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Test { path, .. }
            | Self::Move { path, .. }
            | Self::Copy { path, .. } => path,
        }
    }
}

impl std::fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add { path, value } => write!(f, "add {path} = {value}"),
            Self::Remove { path } => write!(f, "remove {path}"),
            Self::Replace { path, value } => write!(f, "replace {path} = {value}"),
            Self::Test { path, value } => write!(f, "test {path} == {value}"),
            Self::Move { from, path } => write!(f, "move {from} -> {path}"),
            Self::Copy { from, path } => write!(f, "copy {from} -> {path}"),
        }
    }
}

/// Escape one reference token for use in a JSON pointer.
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Undo `escape_pointer_token`.
pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}
