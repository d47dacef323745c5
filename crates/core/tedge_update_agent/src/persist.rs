//! Persisting the state store to disk so enrollment and agent-info
//! status survive a process restart or device reboot.
//!
//! Grounded on `tedge_agent`'s `AgentStateRepository`: a small TOML file,
//! written atomically through `tedge_utils::fs::atomically_write_file_async`
//! so a crash mid-write never leaves a half-written, unparsable file
//! behind.

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;

use crate::state_store::StateSnapshot;

const STATE_FILE_NAME: &str = "state.toml";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Could not read state file {path}")]
    ReadFailed {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not serialize agent state")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error(transparent)]
    WriteFailed(#[from] tedge_utils::fs::AtomFileError),

    #[error("Could not create state directory {path}")]
    CreateDirFailed {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
struct PersistedState {
    is_device_enrolled: bool,
    is_agent_info_reported: bool,
    external_device_id: Option<String>,
    device_update_service_instance: Option<String>,
}

impl From<StateSnapshot> for PersistedState {
    fn from(snapshot: StateSnapshot) -> Self {
        PersistedState {
            is_device_enrolled: snapshot.is_device_enrolled,
            is_agent_info_reported: snapshot.is_agent_info_reported,
            external_device_id: snapshot.external_device_id,
            device_update_service_instance: snapshot.device_update_service_instance,
        }
    }
}

impl From<PersistedState> for StateSnapshot {
    fn from(persisted: PersistedState) -> Self {
        StateSnapshot {
            is_device_enrolled: persisted.is_device_enrolled,
            is_agent_info_reported: persisted.is_agent_info_reported,
            external_device_id: persisted.external_device_id,
            device_update_service_instance: persisted.device_update_service_instance,
        }
    }
}

pub struct StateRepository {
    state_dir: Utf8PathBuf,
    state_file: Utf8PathBuf,
}

impl StateRepository {
    pub fn new(state_dir: Utf8PathBuf) -> Self {
        let state_file = state_dir.join(STATE_FILE_NAME);
        StateRepository { state_dir, state_file }
    }

    /// Loads the persisted snapshot, or the all-false default if no state
    /// file exists yet (first run) or the file on disk is unreadable as
    /// TOML. A corrupt state file must never crash the tick loop on
    /// startup; falling back to default just re-runs enrollment.
    pub async fn load(&self) -> Result<StateSnapshot, PersistError> {
        match fs::read(&self.state_file).await {
            Ok(bytes) => match toml::from_slice::<PersistedState>(&bytes) {
                Ok(persisted) => Ok(persisted.into()),
                Err(error) => {
                    tracing::warn!(path = %self.state_file, %error, "State file is not valid TOML, starting from default state");
                    Ok(StateSnapshot::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(StateSnapshot::default()),
            Err(error) => Err(PersistError::ReadFailed {
                path: self.state_file.clone(),
                source: error,
            }),
        }
    }

    pub async fn store(&self, snapshot: &StateSnapshot) -> Result<(), PersistError> {
        let persisted = PersistedState::from(snapshot.clone());
        let toml = toml::to_string_pretty(&persisted)?;

        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir)
                .await
                .map_err(|source| PersistError::CreateDirFailed {
                    path: self.state_dir.clone(),
                    source,
                })?;
        }

        tedge_utils::fs::atomically_write_file_async(&self.state_file, toml.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tedge_test_utils::fs::TempTedgeDir;

    #[tokio::test]
    async fn load_with_no_state_file_returns_defaults() {
        let temp_dir = TempTedgeDir::new();
        let repo = StateRepository::new(temp_dir.utf8_path_buf());

        let snapshot = repo.load().await.unwrap();
        assert!(!snapshot.is_device_enrolled);
    }

    #[tokio::test]
    async fn a_corrupt_state_file_falls_back_to_defaults_instead_of_erroring() {
        let temp_dir = TempTedgeDir::new();
        let repo = StateRepository::new(temp_dir.utf8_path_buf());
        tokio::fs::write(&repo.state_file, b"not valid toml {{{").await.unwrap();

        let snapshot = repo.load().await.unwrap();
        assert!(!snapshot.is_device_enrolled);
    }

    #[tokio::test]
    async fn stored_state_round_trips() {
        let temp_dir = TempTedgeDir::new();
        let repo = StateRepository::new(temp_dir.utf8_path_buf());

        let snapshot = StateSnapshot {
            is_device_enrolled: true,
            is_agent_info_reported: true,
            external_device_id: Some("device-1".to_string()),
            device_update_service_instance: Some("svc-1".to_string()),
        };
        repo.store(&snapshot).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert!(loaded.is_device_enrolled);
        assert_eq!(loaded.external_device_id.as_deref(), Some("device-1"));
    }
}
