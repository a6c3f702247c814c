//! Input handlers: find remote-URL inputs in the submitted graph and
//! rewrite them to local filenames once downloaded.

use super::{class_type, inputs, inputs_mut};
use crate::fetcher::is_remote;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

/// Registration order is the contract: `LoadImage` before `LoadAudio`.
pub const INPUT_HANDLERS: &[InputHandler] = &[
    InputHandler { class_type: "LoadImage", field: "image", kind: MediaKind::Image },
    InputHandler { class_type: "LoadAudio", field: "audio", kind: MediaKind::Audio },
];

pub struct InputHandler {
    pub class_type: &'static str,
    pub field: &'static str,
    pub kind: MediaKind,
}

/// One occurrence of a remote URL referenced from the graph.
#[derive(Debug, Clone)]
pub struct RemoteInputRef {
    pub node_id: String,
    pub field: &'static str,
    pub kind: MediaKind,
}

/// Walk the graph with the registered input handlers, returning every
/// distinct remote URL found plus the (possibly multiple) node/field
/// occurrences it needs rewritten into once downloaded.
pub fn collect_remote_inputs(
    graph: &serde_json::Map<String, Value>,
) -> (Vec<String>, HashMap<String, Vec<RemoteInputRef>>) {
    let mut urls = Vec::new();
    let mut mapping: HashMap<String, Vec<RemoteInputRef>> = HashMap::new();

    for (node_id, node) in graph {
        let Some(ct) = class_type(node) else { continue };
        let Some(handler) = INPUT_HANDLERS.iter().find(|h| h.class_type == ct) else { continue };
        let Some(node_inputs) = inputs(node) else { continue };
        let Some(value) = node_inputs.get(handler.field).and_then(|v| v.as_str()) else { continue };
        if !is_remote(value) {
            continue;
        }

        if !mapping.contains_key(value) {
            urls.push(value.to_string());
        }
        mapping.entry(value.to_string()).or_default().push(RemoteInputRef {
            node_id: node_id.clone(),
            field: handler.field,
            kind: handler.kind,
        });
    }

    (urls, mapping)
}

/// Apply the resolved url → local-filename mapping back into the graph, in
/// place, for every recorded occurrence.
pub fn rewrite_local_paths(
    graph: &mut serde_json::Map<String, Value>,
    url_to_local: &HashMap<String, String>,
    occurrences: &HashMap<String, Vec<RemoteInputRef>>,
) {
    for (url, refs) in occurrences {
        let Some(local) = url_to_local.get(url) else { continue };
        for r in refs {
            if let Some(node) = graph.get_mut(&r.node_id) {
                if let Some(node_inputs) = inputs_mut(node) {
                    node_inputs.insert(r.field.to_string(), Value::String(local.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn collects_load_image_and_load_audio() {
        let g = graph(json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "https://x.test/a.png"}},
            "2": {"class_type": "LoadAudio", "inputs": {"audio": "https://x.test/b.wav"}},
            "3": {"class_type": "SaveImage", "inputs": {"images": ["1", 0]}},
        }));
        let (urls, mapping) = collect_remote_inputs(&g);
        assert_eq!(urls.len(), 2);
        assert!(mapping.contains_key("https://x.test/a.png"));
        assert!(mapping.contains_key("https://x.test/b.wav"));
    }

    #[test]
    fn ignores_local_paths() {
        let g = graph(json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "already_local.png"}},
        }));
        let (urls, _) = collect_remote_inputs(&g);
        assert!(urls.is_empty());
    }

    #[test]
    fn shared_url_maps_to_multiple_occurrences() {
        let g = graph(json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "https://x.test/a.png"}},
            "2": {"class_type": "LoadImage", "inputs": {"image": "https://x.test/a.png"}},
        }));
        let (urls, mapping) = collect_remote_inputs(&g);
        assert_eq!(urls.len(), 1);
        assert_eq!(mapping["https://x.test/a.png"].len(), 2);
    }

    #[test]
    fn rewrite_applies_to_every_occurrence() {
        let mut g = graph(json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "https://x.test/a.png"}},
            "2": {"class_type": "LoadImage", "inputs": {"image": "https://x.test/a.png"}},
        }));
        let (_, mapping) = collect_remote_inputs(&g);
        let mut local = HashMap::new();
        local.insert("https://x.test/a.png".to_string(), "a_12345.png".to_string());
        rewrite_local_paths(&mut g, &local, &mapping);
        assert_eq!(g["1"]["inputs"]["image"], "a_12345.png");
        assert_eq!(g["2"]["inputs"]["image"], "a_12345.png");
    }

    #[test]
    fn rewrite_is_idempotent_once_local() {
        let mut g = graph(json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "a_12345.png"}},
        }));
        let (urls, mapping) = collect_remote_inputs(&g);
        assert!(urls.is_empty());
        rewrite_local_paths(&mut g, &HashMap::new(), &mapping);
        assert_eq!(g["1"]["inputs"]["image"], "a_12345.png");
    }
}
