use thiserror::Error;

/// Everything the API client can fail with.
///
/// `Auth` and `AuthResponse` form the authentication family: the credential
/// exchange itself did not produce a usable token. `Request` is a downstream
/// call that reached the API and came back with a non-success status.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Token exchange returned a non-success status
    #[error("authentication failed with status {status}: {body}")]
    Auth { status: u16, body: String },

    /// Token exchange succeeded but the body carried no usable token
    #[error("authentication response was not understood: {0}")]
    AuthResponse(String),

    /// A downstream API call returned a non-success status
    #[error("{method} {path} failed with status {status}: {body}")]
    Request {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// The API could not be reached, or the body could not be read
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Report id that would not survive as a single URL path segment
    #[error("invalid report id '{0}': must be a single non-empty path segment")]
    InvalidReportId(String),

    /// A success response whose body was not JSON
    #[error("response from {path} was not valid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth { .. } | ClientError::AuthResponse(_))
    }

    /// HTTP status carried by the error, if the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Auth { status, .. } | ClientError::Request { status, .. } => {
                Some(*status)
            }
            ClientError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_family_is_detected() {
        let err = ClientError::Auth {
            status: 401,
            body: "{\"error\":\"bad credentials\"}".to_string(),
        };
        assert!(err.is_auth());
        assert_eq!(err.status(), Some(401));
        assert!(ClientError::AuthResponse("missing token".to_string()).is_auth());
    }

    #[test]
    fn request_error_message_carries_status_and_body() {
        let err = ClientError::Request {
            method: "GET".to_string(),
            path: "/reports/r1/status".to_string(),
            status: 404,
            body: "not found".to_string(),
        };
        assert!(!err.is_auth());
        assert_eq!(
            err.to_string(),
            "GET /reports/r1/status failed with status 404: not found"
        );
    }
}
