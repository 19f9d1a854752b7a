#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("SSH error: {source}")]
    Ssh {
        #[from]
        source: ssh2::Error,
    },

    #[error("{0} is missing its credential")]
    CredentialMissing(String),

    #[error("credential for {0} is invalid: {1}")]
    CredentialInvalid(String, String),

    #[error("{0} is unreachable: {1}")]
    Unreachable(String, String),

    #[error("retries exhausted: {0}")]
    RetryExhausted(String),
}
