use crate::options::OptionsError;

pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route candidates available for model {0:?}")]
    NoCandidates(String),
    #[error("invalid routing options: {0}")]
    InvalidOptions(#[from] OptionsError),
}
