//! Output handlers: enumerate artifacts to upload from the engine's
//! post-run history, harvesting in registration order, plus the
//! VHS_VideoCombine fallback scan over the submitted graph.

use super::{class_type, inputs};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Registration order is the contract — it determines the order Upload
/// Tasks are emitted in, which in turn determines the order of
/// `output_data.urls` in the terminal callback.
pub const OUTPUT_HANDLER_ORDER: &[&str] =
    &["SaveImage", "PreviewImage", "SaveAudio", "SaveVideo", "VHS_VideoCombine"];

pub struct OutputHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Image,
    Video,
    Audio,
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub kind: OutputKind,
    pub engine_filename: String,
    pub engine_subfolder: String,
    pub engine_folder_type: String,
    pub destination_path: String,
    pub source_node_id: String,
}

struct Harvested {
    kind: OutputKind,
    filename: String,
    subfolder: String,
    folder_type: String,
}

fn harvest_array(arr: &[Value], default_folder_type: &str, kind: OutputKind) -> Vec<Harvested> {
    arr.iter()
        .filter_map(|entry| {
            let filename = entry.get("filename")?.as_str()?.to_string();
            let subfolder = entry
                .get("subfolder")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let folder_type = entry
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or(default_folder_type)
                .to_string();
            Some(Harvested { kind, filename, subfolder, folder_type })
        })
        .collect()
}

fn get_array<'a>(out: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    out.get(key).and_then(|v| v.as_array())
}

fn harvest_images(out: &Value, default_folder_type: &str) -> Vec<Harvested> {
    get_array(out, "images")
        .map(|a| harvest_array(a, default_folder_type, OutputKind::Image))
        .unwrap_or_default()
}

fn harvest_audio(out: &Value) -> Vec<Harvested> {
    get_array(out, "audio")
        .or_else(|| get_array(out, "audios"))
        .map(|a| harvest_array(a, "output", OutputKind::Audio))
        .unwrap_or_default()
}

fn harvest_save_video(out: &Value, node: &Value) -> Vec<Harvested> {
    for key in ["images", "videos", "gifs"] {
        if let Some(arr) = get_array(out, key) {
            if !arr.is_empty() {
                return harvest_array(arr, "output", OutputKind::Video);
            }
        }
    }
    // Fallback: engine didn't report a recognised array for this node.
    let prefix = inputs(node)
        .and_then(|i| i.get("filename_prefix"))
        .and_then(|v| v.as_str())
        .unwrap_or("output");
    vec![Harvested {
        kind: OutputKind::Video,
        filename: format!("{prefix}_00001.mp4"),
        subfolder: String::new(),
        folder_type: "output".to_string(),
    }]
}

fn parse_view_url(url: &str) -> Option<(String, String, String)> {
    let query = url.strip_prefix("/view?")?;
    let mut filename = None;
    let mut subfolder = String::new();
    let mut folder_type = "output".to_string();
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        let v = urlencoding_decode(v);
        match k {
            "filename" => filename = Some(v),
            "subfolder" => subfolder = v,
            "type" => folder_type = v,
            _ => {}
        }
    }
    Some((filename?, subfolder, folder_type))
}

fn urlencoding_decode(s: &str) -> String {
    s.replace("%20", " ").replace('+', " ")
}

fn harvest_vhs(out: &Value, node: &Value) -> Vec<Harvested> {
    let mut harvested = Vec::new();

    if let Some(gifs) = get_array(out, "gifs") {
        harvested.extend(harvest_array(gifs, "output", OutputKind::Video));
    }

    if let Some(widgets) = get_array(out, "widgets") {
        for widget in widgets {
            let Some(widget_type) = widget.get("type").and_then(|v| v.as_str()) else { continue };
            if widget_type != "image" && widget_type != "preview" {
                continue;
            }
            let Some(value) = widget.get("value").and_then(|v| v.as_str()) else { continue };
            if let Some((filename, subfolder, folder_type)) = parse_view_url(value) {
                harvested.push(Harvested { kind: OutputKind::Video, filename, subfolder, folder_type });
            }
        }
    }

    if !harvested.is_empty() {
        return harvested;
    }

    // Fallback only reached when called directly on a node that's in
    // outputs but produced nothing above; the submitted-graph scan for
    // nodes entirely absent from outputs happens in harvest_upload_tasks.
    let format = inputs(node).and_then(|i| i.get("format")).and_then(|v| v.as_str()).unwrap_or("mp4");
    let ext = match format {
        "webm" => "webm",
        "gif" => "gif",
        _ => "mp4",
    };
    let prefix = inputs(node)
        .and_then(|i| i.get("filename_prefix"))
        .and_then(|v| v.as_str())
        .unwrap_or("output");
    vec![Harvested {
        kind: OutputKind::Video,
        filename: format!("{prefix}00001.{ext}"),
        subfolder: String::new(),
        folder_type: "output".to_string(),
    }]
}

fn extension_for(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("bin")
}

/// Harvest every Upload Task for a completed job, in registry order,
/// followed by the VHS_VideoCombine fallback scan over nodes absent from
/// `outputs` entirely: the fallback
/// is a gap-filler for nodes with no Upload Task yet, not a second pass
/// over nodes the normal path already handled.
pub fn harvest_upload_tasks(
    graph: &Map<String, Value>,
    outputs: &Map<String, Value>,
    task_id: &str,
    date_str: &str,
) -> Vec<UploadTask> {
    let mut tasks = Vec::new();
    let mut sequence: u32 = 0;
    let mut handled_nodes: HashSet<String> = HashSet::new();

    let mut push_all = |harvested: Vec<Harvested>, node_id: &str, tasks: &mut Vec<UploadTask>, sequence: &mut u32| {
        if harvested.is_empty() {
            return;
        }
        handled_nodes.insert(node_id.to_string());
        for h in harvested {
            let ext = extension_for(&h.filename);
            let destination = format!("{date_str}/{task_id}_{sequence}.{ext}");
            *sequence += 1;
            tasks.push(UploadTask {
                kind: h.kind,
                engine_filename: h.filename,
                engine_subfolder: h.subfolder,
                engine_folder_type: h.folder_type,
                destination_path: destination,
                source_node_id: node_id.to_string(),
            });
        }
    };

    for &handler_class in OUTPUT_HANDLER_ORDER {
        for (node_id, node) in graph {
            if class_type(node) != Some(handler_class) {
                continue;
            }
            let Some(out) = outputs.get(node_id) else { continue };
            let harvested = match handler_class {
                "SaveImage" => harvest_images(out, "output"),
                "PreviewImage" => harvest_images(out, "temp"),
                "SaveAudio" => harvest_audio(out),
                "SaveVideo" => harvest_save_video(out, node),
                "VHS_VideoCombine" => harvest_vhs(out, node),
                _ => vec![],
            };
            push_all(harvested, node_id, &mut tasks, &mut sequence);
        }
    }

    // VHS fallback: nodes entirely absent from `outputs` whose submitted
    // graph entry declares save_output truthy.
    for (node_id, node) in graph {
        if class_type(node) != Some("VHS_VideoCombine") {
            continue;
        }
        if handled_nodes.contains(node_id) || outputs.contains_key(node_id) {
            continue;
        }
        let save_output = inputs(node)
            .and_then(|i| i.get("save_output"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !save_output {
            continue;
        }
        let format = inputs(node).and_then(|i| i.get("format")).and_then(|v| v.as_str()).unwrap_or("mp4");
        let ext = match format {
            "webm" => "webm",
            "gif" => "gif",
            _ => "mp4",
        };
        let prefix = inputs(node)
            .and_then(|i| i.get("filename_prefix"))
            .and_then(|v| v.as_str())
            .unwrap_or("output");
        let harvested = vec![Harvested {
            kind: OutputKind::Video,
            filename: format!("{prefix}00001.{ext}"),
            subfolder: String::new(),
            folder_type: "output".to_string(),
        }];
        push_all(harvested, node_id, &mut tasks, &mut sequence);
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn harvests_save_image() {
        let graph = map(json!({
            "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "out"}},
        }));
        let outputs = map(json!({
            "9": {"images": [{"filename": "out_00001_.png", "subfolder": "", "type": "output"}]},
        }));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].engine_filename, "out_00001_.png");
        assert_eq!(tasks[0].destination_path, "20260727/t1_0.png");
    }

    #[test]
    fn no_artifacts_means_no_tasks() {
        let graph = map(json!({
            "9": {"class_type": "SaveImage", "inputs": {}},
        }));
        let outputs = map(json!({"9": {"images": []}}));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert!(tasks.is_empty());
    }

    #[test]
    fn destination_paths_are_unique_and_sequential() {
        let graph = map(json!({
            "1": {"class_type": "SaveImage", "inputs": {}},
        }));
        let outputs = map(json!({
            "1": {"images": [
                {"filename": "a.png", "type": "output"},
                {"filename": "b.png", "type": "output"}
            ]},
        }));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks[0].destination_path, "20260727/t1_0.png");
        assert_eq!(tasks[1].destination_path, "20260727/t1_1.png");
    }

    #[test]
    fn vhs_fallback_fires_only_when_absent_from_outputs_and_save_output_true() {
        let graph = map(json!({
            "5": {"class_type": "VHS_VideoCombine", "inputs": {"save_output": true, "format": "mp4", "filename_prefix": "vid"}},
        }));
        let outputs = map(json!({}));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].engine_filename, "vid00001.mp4");
    }

    #[test]
    fn vhs_no_fallback_when_save_output_false_and_absent() {
        let graph = map(json!({
            "5": {"class_type": "VHS_VideoCombine", "inputs": {"save_output": false}},
        }));
        let outputs = map(json!({}));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert!(tasks.is_empty());
    }

    #[test]
    fn vhs_fallback_does_not_double_fire_when_already_handled() {
        let graph = map(json!({
            "5": {"class_type": "VHS_VideoCombine", "inputs": {"save_output": true}},
        }));
        let outputs = map(json!({
            "5": {"gifs": [{"filename": "vid.gif", "type": "output"}]},
        }));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].engine_filename, "vid.gif");
    }

    #[test]
    fn save_video_falls_back_to_synthesised_filename() {
        let graph = map(json!({
            "7": {"class_type": "SaveVideo", "inputs": {"filename_prefix": "clip"}},
        }));
        let outputs = map(json!({"7": {}}));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks[0].engine_filename, "clip_00001.mp4");
    }

    #[test]
    fn registry_order_is_save_image_then_preview_then_audio_then_video() {
        let graph = map(json!({
            "3": {"class_type": "SaveAudio", "inputs": {}},
            "1": {"class_type": "SaveImage", "inputs": {}},
            "2": {"class_type": "PreviewImage", "inputs": {}},
        }));
        let outputs = map(json!({
            "1": {"images": [{"filename": "a.png", "type": "output"}]},
            "2": {"images": [{"filename": "b.png", "type": "temp"}]},
            "3": {"audio": [{"filename": "c.mp3", "type": "output"}]},
        }));
        let tasks = harvest_upload_tasks(&graph, &outputs, "t1", "20260727");
        assert_eq!(tasks[0].engine_filename, "a.png");
        assert_eq!(tasks[1].engine_filename, "b.png");
        assert_eq!(tasks[2].engine_filename, "c.mp3");
    }
}
