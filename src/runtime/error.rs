use crate::grpc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Endpoint(#[from] grpc::Error),
    #[error("runtime call `{operation}` failed: {source}")]
    Rpc {
        operation: &'static str,
        #[source]
        source: Box<tonic::Status>,
    },
    #[error("runtime returned an empty `{0}` response")]
    EmptyResponse(&'static str),
    #[error("failed to parse verbose info of container `{id}`: {source}")]
    VerboseInfo {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn rpc(operation: &'static str, status: tonic::Status) -> Self {
        Error::Rpc {
            operation,
            source: Box::new(status),
        }
    }

    /// Whether the runtime reported that the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Rpc { source, .. } if source.code() == tonic::Code::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
