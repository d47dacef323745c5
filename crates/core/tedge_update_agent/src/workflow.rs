//! Parsing the update manifest carried in the `upd_req` payload into a
//! [`WorkflowHandle`] the update worker can execute.

use serde::Deserialize;

/// The minimum manifest version this agent understands. Older manifests
/// predate the content-handler registry and are rejected outright rather
/// than guessed at.
pub const MIN_SUPPORTED_MANIFEST_VERSION: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    pub component_id: String,
    pub handler: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub manifest_version: u32,
    pub workflow_id: String,
    pub components: Vec<ComponentManifest>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowParseError {
    #[error("Could not parse update manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Manifest version {found} is older than the minimum supported version {min}")]
    UnsupportedVersion { found: u32, min: u32 },

    #[error("Manifest declares no components")]
    Empty,
}

/// A parsed, validated manifest ready to be handed to the update worker.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub components: Vec<ComponentManifest>,
}

pub fn parse(payload: &[u8]) -> Result<WorkflowHandle, WorkflowParseError> {
    let manifest: UpdateManifest = serde_json::from_slice(payload)?;

    if manifest.manifest_version < MIN_SUPPORTED_MANIFEST_VERSION {
        return Err(WorkflowParseError::UnsupportedVersion {
            found: manifest.manifest_version,
            min: MIN_SUPPORTED_MANIFEST_VERSION,
        });
    }

    if manifest.components.is_empty() {
        return Err(WorkflowParseError::Empty);
    }

    Ok(WorkflowHandle {
        workflow_id: manifest.workflow_id,
        components: manifest.components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json(version: u32, components: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "manifestVersion": version,
            "workflowId": "wf-1",
            "components": serde_json::from_str::<serde_json::Value>(components).unwrap(),
        }))
        .unwrap()
    }

    #[test]
    fn rejects_manifests_older_than_minimum_version() {
        let payload = manifest_json(4, "[]");
        let err = parse(&payload).unwrap_err();
        assert!(matches!(err, WorkflowParseError::UnsupportedVersion { found: 4, min: 5 }));
    }

    #[test]
    fn rejects_manifests_with_no_components() {
        let payload = manifest_json(5, "[]");
        assert!(matches!(parse(&payload), Err(WorkflowParseError::Empty)));
    }

    #[test]
    fn accepts_a_well_formed_manifest() {
        let payload = manifest_json(
            5,
            r#"[{"componentId": "fw", "handler": "firmware", "properties": {}}]"#,
        );
        let workflow = parse(&payload).unwrap();
        assert_eq!(workflow.workflow_id, "wf-1");
        assert_eq!(workflow.components.len(), 1);
    }
}
