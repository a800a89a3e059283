use std::time::Duration;

/// Errors from talking to the generation server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a status the protocol does not allow here.
    #[error("Server returned {status}: {body}")]
    Server { status: u16, body: String },

    /// A success status whose body does not match either response shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The result did not become available within the configured budget.
    #[error("Result not ready after {}s", waited.as_secs())]
    Timeout { waited: Duration },

    #[error("Wait cancelled")]
    Cancelled,
}
