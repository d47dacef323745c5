use camino::Utf8PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),

    #[error(transparent)]
    StateStore(#[from] crate::persist::PersistError),

    #[error("Failed to connect to the MQTT broker")]
    MqttConnect(#[source] rumqttc::v5::ClientError),

    #[error("{0}")]
    Other(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}")]
    ReadFailed {
        path: Utf8PathBuf,
        #[source]
        source: figment::Error,
    },

    #[error("Configuration is invalid: {0}")]
    Invalid(String),
}
