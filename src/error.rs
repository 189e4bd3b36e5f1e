use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),
    #[error("InvalidPlan: {0}")]
    InvalidPlan(String),
    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),
    #[error("UnableToSerializeObject: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("UnableToParseYaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("UnableToReadFile: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ProduceRejected: {status}: {body}")]
    ProduceRejected { status: StatusCode, body: String },
}

impl Error {
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// How a single cluster call failed. Decides whether it is worth another try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// The resource (or the field) does not exist yet.
    NotFound,
    /// Connectivity, throttling, server-side trouble. Retryable.
    Communication,
    /// The server rejected the manifest. Not retryable.
    Validation,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    #[allow(dead_code)]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: msg.into(),
        }
    }

    pub fn communication(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Communication,
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: msg.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Classify an HTTP status returned by the API server. Anything that is not
    /// clearly the manifest's fault stays retryable.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let kind = match StatusCode::from_u16(code) {
            Ok(StatusCode::NOT_FOUND) => ErrorKind::NotFound,
            Ok(StatusCode::BAD_REQUEST)
            | Ok(StatusCode::UNPROCESSABLE_ENTITY)
            | Ok(StatusCode::FORBIDDEN)
            | Ok(StatusCode::METHOD_NOT_ALLOWED) => ErrorKind::Validation,
            _ => ErrorKind::Communication,
        };
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(response) => {
                ClientError::from_status(response.code, format!("{}: {}", response.reason, response.message))
            }
            kube::Error::SerdeError(e) => ClientError::validation(e.to_string()),
            kube::Error::BuildRequest(e) => ClientError::validation(e.to_string()),
            other => ClientError::communication(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::validation(e.to_string())
    }
}
