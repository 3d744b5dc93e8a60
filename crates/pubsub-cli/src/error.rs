#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Client(#[from] pubsub_subscriber::Error),

    #[error("channel-group registration failed: {0}")]
    Admin(pubsub_subscriber::ErrorEvent),

    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;
