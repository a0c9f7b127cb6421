//! Hands reports to whatever ships them off the host.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::report::Report;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to serialize report: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write report: {0}")]
    Write(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait Publisher {
    fn publish(&mut self, report: &Report) -> impl Future<Output = Result<()>> + Send;
}

/// Writes each report as one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesPublisher<W> {
    writer: W,
}

impl<W> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesPublisher<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> Publisher for JsonLinesPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, report: &Report) -> Result<()> {
        let mut line = serde_json::to_vec(report).map_err(Error::Serialize)?;
        line.push(b'\n');
        self.writer.write_all(&line).await.map_err(Error::Write)?;
        self.writer.flush().await.map_err(Error::Write)?;

        Ok(())
    }
}
