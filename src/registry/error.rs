use crate::runtime;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to the container runtime: {0}")]
    Connect(#[source] runtime::Error),
    #[error("failed to list containers: {0}")]
    ListContainers(#[source] runtime::Error),
    #[error("failed to list images: {0}")]
    ListImages(#[source] runtime::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
