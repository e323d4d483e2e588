//! Template workflow loading and node patching.
//!
//! A workflow document maps node ids to `{ inputs, class_type, _meta }`
//! objects. Patching only touches `inputs` of the known node ids below;
//! every other node passes through untouched.

use std::path::Path;

use rand::Rng;
use serde_json::{json, Map, Value};

use crate::error::WorkflowError;
use crate::services::prompt_catalog::{self, Prompts};

pub type Workflow = Map<String, Value>;

pub const NODE_LOAD_IMAGE: &str = "525";
pub const NODE_POSITIVE_PROMPT: &str = "320";
pub const NODE_NEGATIVE_PROMPT: &str = "12";
pub const NODE_SAVE: &str = "524";
pub const NODE_SAVE_ALT: &str = "533";
pub const NODE_SAMPLER: &str = "14";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub async fn load_template(path: &Path) -> Result<Workflow, WorkflowError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(WorkflowError::NotFound(path.to_path_buf()));
    }

    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| WorkflowError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let workflow: Workflow =
        serde_json::from_slice(&raw).map_err(|e| WorkflowError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    tracing::info!(
        path = %path.display(),
        nodes = workflow.len(),
        "Workflow template loaded"
    );
    Ok(workflow)
}

/// The node that saves the final image: `533` when the template has it, else `524`.
pub fn save_node_id(workflow: &Workflow) -> &'static str {
    if workflow.contains_key(NODE_SAVE_ALT) {
        NODE_SAVE_ALT
    } else {
        NODE_SAVE
    }
}

/// Per-request random values written into the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionValues {
    pub session_id: String,
    pub user_hash: String,
    pub seed: u64,
}

impl SessionValues {
    pub fn random(site: &str) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
            .collect();
        let hash_bytes: [u8; 8] = rng.random();

        Self {
            session_id: format!(
                "{site}_session_{}_{suffix}",
                chrono::Utc::now().timestamp_millis()
            ),
            user_hash: hex::encode(hash_bytes),
            seed: rng.random_range(0..4_294_967_295),
        }
    }
}

/// Everything a headshot request writes into the template.
#[derive(Debug, Clone)]
pub struct HeadshotPatch {
    pub uploaded_image: String,
    pub prompts: Prompts,
    pub session: SessionValues,
}

fn set_input(workflow: &mut Workflow, node: &str, key: &str, value: Value) -> bool {
    match workflow
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        Some(inputs) => {
            inputs.insert(key.to_string(), value);
            true
        }
        None => false,
    }
}

/// Copy the template and write the request values into the known nodes.
pub fn patch_headshot(template: &Workflow, patch: &HeadshotPatch) -> Workflow {
    let mut workflow = template.clone();
    let save_node = save_node_id(&workflow);

    if set_input(&mut workflow, NODE_LOAD_IMAGE, "image", json!(patch.uploaded_image)) {
        tracing::debug!(node = NODE_LOAD_IMAGE, image = %patch.uploaded_image, "Patched input image");
    } else {
        tracing::warn!(node = NODE_LOAD_IMAGE, "Image input node not found in workflow");
    }

    if !set_input(&mut workflow, NODE_POSITIVE_PROMPT, "text", json!(patch.prompts.positive)) {
        tracing::warn!(node = NODE_POSITIVE_PROMPT, "Positive prompt node not found in workflow");
    }
    if !set_input(&mut workflow, NODE_NEGATIVE_PROMPT, "text", json!(patch.prompts.negative)) {
        tracing::warn!(node = NODE_NEGATIVE_PROMPT, "Negative prompt node not found in workflow");
    }

    let session_set = set_input(&mut workflow, save_node, "session_id", json!(patch.session.session_id))
        && set_input(&mut workflow, save_node, "user_hash", json!(patch.session.user_hash));
    if session_set {
        tracing::debug!(node = save_node, session_id = %patch.session.session_id, "Patched session");
    } else {
        tracing::warn!(node = save_node, "Save node not found in workflow");
    }

    let sampler_set = set_input(&mut workflow, NODE_SAMPLER, "seed", json!(patch.session.seed))
        && set_input(&mut workflow, NODE_SAMPLER, "steps", json!(prompt_catalog::STEPS))
        && set_input(&mut workflow, NODE_SAMPLER, "cfg", json!(prompt_catalog::CFG));
    if sampler_set {
        tracing::debug!(
            node = NODE_SAMPLER,
            seed = patch.session.seed,
            steps = prompt_catalog::STEPS,
            cfg = prompt_catalog::CFG,
            "Patched sampler"
        );
    } else {
        tracing::warn!(node = NODE_SAMPLER, "Sampler node not found in workflow");
    }

    let missing = missing_critical_nodes(&workflow);
    if !missing.is_empty() {
        let available: Vec<&str> = workflow.keys().take(20).map(String::as_str).collect();
        tracing::warn!(?missing, ?available, "Workflow is missing critical nodes");
    }

    workflow
}

pub fn missing_critical_nodes(workflow: &Workflow) -> Vec<&'static str> {
    [
        NODE_LOAD_IMAGE,
        NODE_POSITIVE_PROMPT,
        NODE_NEGATIVE_PROMPT,
        save_node_id(workflow),
        NODE_SAMPLER,
    ]
    .into_iter()
    .filter(|id| !workflow.contains_key(*id))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(class_type: &str, inputs: Value) -> Value {
        json!({ "inputs": inputs, "class_type": class_type, "_meta": { "title": class_type } })
    }

    fn template() -> Workflow {
        json!({
            "525": node("LoadImage", json!({ "image": "placeholder.png" })),
            "320": node("CLIPTextEncode", json!({ "text": "old positive", "clip": ["4", 1] })),
            "12": node("CLIPTextEncode", json!({ "text": "old negative" })),
            "524": node("SaveJPG", json!({ "session_id": "", "user_hash": "" })),
            "14": node("KSampler", json!({ "seed": 1, "steps": 30, "cfg": 7.0, "sampler_name": "euler" })),
            "99": node("Untouched", json!({ "value": 42 })),
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn patch() -> HeadshotPatch {
        HeadshotPatch {
            uploaded_image: "deeplab_face_1.jpg".into(),
            prompts: prompt_catalog::headshot_prompts("office", "suit"),
            session: SessionValues {
                session_id: "deeplab_session_1_abc".into(),
                user_hash: "0011223344556677".into(),
                seed: 12345,
            },
        }
    }

    #[test]
    fn patches_known_nodes_and_keeps_template_intact() {
        let tpl = template();
        let patched = patch_headshot(&tpl, &patch());

        assert_eq!(patched["525"]["inputs"]["image"], json!("deeplab_face_1.jpg"));
        assert!(patched["320"]["inputs"]["text"]
            .as_str()
            .unwrap()
            .contains("corporate office"));
        assert_eq!(patched["320"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(patched["12"]["inputs"]["text"], json!(prompt_catalog::NEGATIVE_PROMPT));
        assert_eq!(patched["524"]["inputs"]["session_id"], json!("deeplab_session_1_abc"));
        assert_eq!(patched["14"]["inputs"]["seed"], json!(12345));
        assert_eq!(patched["14"]["inputs"]["steps"], json!(10));
        assert_eq!(patched["14"]["inputs"]["cfg"], json!(3.0));
        assert_eq!(patched["14"]["inputs"]["sampler_name"], json!("euler"));
        assert_eq!(patched["99"], tpl["99"]);

        assert_eq!(tpl["525"]["inputs"]["image"], json!("placeholder.png"));
    }

    #[test]
    fn alternate_save_node_takes_session() {
        let mut tpl = template();
        tpl.insert("533".into(), node("SaveJPG", json!({})));

        let patched = patch_headshot(&tpl, &patch());
        assert_eq!(patched["533"]["inputs"]["user_hash"], json!("0011223344556677"));
        assert_eq!(patched["524"]["inputs"]["session_id"], json!(""));
    }

    #[test]
    fn missing_nodes_are_skipped_and_reported() {
        let mut tpl = template();
        tpl.remove("525");
        tpl.remove("14");

        let patched = patch_headshot(&tpl, &patch());
        assert!(!patched.contains_key("525"));
        assert_eq!(missing_critical_nodes(&patched), vec!["525", "14"]);
    }

    #[test]
    fn session_values_have_expected_shape() {
        let values = SessionValues::random("deeplab");
        let suffix = values.session_id.rsplit('_').next().unwrap();
        assert!(values.session_id.starts_with("deeplab_session_"));
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
        assert_eq!(values.user_hash.len(), 16);
        assert!(values.seed < 4_294_967_295);
    }

    #[tokio::test]
    async fn load_template_distinguishes_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_template(&dir.path().join("none.json")).await;
        assert!(matches!(missing, Err(WorkflowError::NotFound(_))));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"[1, 2, 3]").unwrap();
        assert!(matches!(load_template(&bad).await, Err(WorkflowError::Invalid { .. })));

        let good = dir.path().join("good.json");
        std::fs::write(&good, serde_json::to_vec(&template()).unwrap()).unwrap();
        assert_eq!(load_template(&good).await.unwrap().len(), 6);
    }
}
