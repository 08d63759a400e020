use std::time::Duration;
use thiserror::Error;

pub type ActuatorResult<T> = Result<T, ActuatorError>;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("{what} is not configured")]
    NotConfigured { what: &'static str },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("payload for {topic} could not be encoded: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },

    #[error("unsupported bus url: {0}")]
    BadUrl(String),
}
