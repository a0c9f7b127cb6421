//! Runtime endpoint parsing and gRPC channels over unix sockets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{pin, task};

use hyper_util::rt::TokioIo;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/containerd/containerd.sock";

const UNIX_SCHEME: &str = "unix";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("runtime endpoint is empty")]
    EmptyEndpoint,
    #[error("protocol `{scheme}` of endpoint `{endpoint}` is not supported, only unix sockets are")]
    UnsupportedScheme { endpoint: String, scheme: String },
    #[error("endpoint `{0}` does not name an absolute socket path")]
    RelativePath(String),
    #[error("runtime socket `{path}` is not reachable: {source}")]
    SocketUnreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to socket `{path}`: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A validated container runtime endpoint. Only unix sockets are supported.
///
/// # Examples
///
/// ```
/// # use cri_probe::grpc::Endpoint;
/// let endpoint = Endpoint::parse("unix:///run/containerd/containerd.sock").unwrap();
/// assert_eq!(endpoint.path().to_str(), Some("/run/containerd/containerd.sock"));
/// assert!(Endpoint::parse("tcp://10.0.0.1:2375").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    /// Parses `unix://<path>`. A bare absolute path is accepted as a unix socket
    /// path for compatibility, with a warning.
    pub fn parse(src: &str) -> Result<Self> {
        let src = src.trim();
        if src.is_empty() {
            return Err(Error::EmptyEndpoint);
        }

        let path = match src.split_once("://") {
            Some((scheme, path)) if scheme == UNIX_SCHEME => path,
            Some((scheme, _)) => {
                return Err(Error::UnsupportedScheme {
                    endpoint: src.to_owned(),
                    scheme: scheme.to_owned(),
                });
            }
            None => {
                log::warn!(
                    "Using {src:?} as endpoint is deprecated, please consider using full url format"
                );
                src
            }
        };

        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(Error::RelativePath(src.to_owned()));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_ENDPOINT.trim_start_matches("unix://")),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{UNIX_SCHEME}://{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
struct UnixConnector {
    path: PathBuf,
}

impl tower::Service<hyper::Uri> for UnixConnector {
    type Response = TokioIo<tokio::net::UnixStream>;

    type Error = std::io::Error;

    type Future =
        pin::Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: hyper::Uri) -> Self::Future {
        let path = self.path.clone();
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(path).await?;

            Ok(TokioIo::new(stream))
        })
    }
}

/// Dials the runtime socket named by `endpoint`.
///
/// # Errors
///
/// - [`Error::SocketUnreachable`] if the socket file does not exist or cannot be inspected.
/// - [`Error::SocketConnect`] if the gRPC channel cannot be established.
pub async fn channel_for_endpoint(endpoint: &Endpoint) -> Result<Channel> {
    let path = endpoint.path();
    match path.try_exists() {
        Ok(true) => {}
        Ok(false) => {
            return Err(Error::SocketUnreachable {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Err(source) => {
            return Err(Error::SocketUnreachable {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    log::debug!("Connecting to {}...", path.display());
    let connector = UnixConnector {
        path: path.to_path_buf(),
    };
    let channel = TonicEndpoint::from_static("http://[::]:50051")
        .connect_with_connector(connector)
        .await
        .map_err(|source| Error::SocketConnect {
            path: path.to_path_buf(),
            source,
        })?;
    log::debug!("Created channel for {}.", path.display());

    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_endpoint() {
        let endpoint = Endpoint::parse("unix:///var/run/crio/crio.sock").unwrap();
        assert_eq!(endpoint.path(), Path::new("/var/run/crio/crio.sock"));
        assert_eq!(endpoint.to_string(), "unix:///var/run/crio/crio.sock");
    }

    #[test]
    fn test_parse_bare_path_falls_back_to_unix() {
        let endpoint = Endpoint::parse("/run/containerd/containerd.sock").unwrap();
        assert_eq!(endpoint.path(), Path::new("/run/containerd/containerd.sock"));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        match Endpoint::parse("tcp://127.0.0.1:2375") {
            Err(Error::UnsupportedScheme { scheme, .. }) => assert_eq!(scheme, "tcp"),
            other => panic!("expected UnsupportedScheme, got {other:?}"),
        }
        assert!(matches!(
            Endpoint::parse("npipe:////./pipe/docker_engine"),
            Err(Error::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_empty_and_relative() {
        assert!(matches!(Endpoint::parse("  "), Err(Error::EmptyEndpoint)));
        assert!(matches!(
            Endpoint::parse("unix///var/run/dockershim.sock"),
            Err(Error::RelativePath(_))
        ));
        assert!(matches!(
            Endpoint::parse("unix://relative.sock"),
            Err(Error::RelativePath(_))
        ));
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(Endpoint::default().to_string(), DEFAULT_ENDPOINT);
    }

    #[tokio::test]
    async fn test_channel_for_missing_socket() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("missing.sock");
        let endpoint = Endpoint::parse(&format!("unix://{}", path.display())).unwrap();

        match channel_for_endpoint(&endpoint).await {
            Err(Error::SocketUnreachable { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected SocketUnreachable, got {other:?}"),
        }
    }
}
