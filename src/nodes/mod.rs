//! Node Registry — pluggable handlers over the engine graph.
//!
//! Two parallel lists of handlers, each tried in registration order: input
//! handlers rewrite remote-URL inputs to local paths before submit; output
//! handlers enumerate artifacts to upload after the engine reports history.
//! Modelled as sum types of concrete handler variants rather than trait
//! objects — the handler set is small, fixed, and the iteration order is
//! part of the contract.

pub mod input;
pub mod output;

pub use input::{collect_remote_inputs, rewrite_local_paths, RemoteInputRef, InputHandler};
pub use output::{harvest_upload_tasks, OutputHandler, UploadTask};

use serde_json::Value;

/// A node record is `{class_type, inputs}`; the graph is a map of node id
/// to that record. The core treats `inputs` as an opaque heterogeneous
/// mapping and never traverses edges itself.
pub fn class_type(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(|v| v.as_str())
}

pub fn inputs(node: &Value) -> Option<&serde_json::Map<String, Value>> {
    node.get("inputs").and_then(|v| v.as_object())
}

pub fn inputs_mut(node: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    node.get_mut("inputs").and_then(|v| v.as_object_mut())
}
