use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Malformed fragment: {0}")]
    MalformedFragment(String),
}
