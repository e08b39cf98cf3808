use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedcapError {
    #[error("no API token configured for project {project}")]
    MissingToken { project: String },

    #[error("invalid platform URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("{action} request failed: {source}")]
    Http {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{action} returned {status}: {message}")]
    Api {
        action: &'static str,
        status: u16,
        message: String,
    },

    #[error("{action} response could not be decoded: {source}")]
    Decode {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action} response had unexpected shape: {message}")]
    UnexpectedShape {
        action: &'static str,
        message: String,
    },
}
