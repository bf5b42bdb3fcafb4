use std::io;
use std::time::Duration;

use anyhow::Context;
use async_channel::Sender;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::trace;

use crate::errors::ParseError;

/// 📥 Pulls replay bytes off the replay host as a stream. Never buffers the whole file.
#[derive(Debug)]
pub struct ReplayFetcher {
    client: reqwest::Client,
}

impl ReplayFetcher {
    pub fn new() -> anyhow::Result<Self> {
        // -- no overall timeout here: the pipeline deadline owns the clock
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("💀 The replay fetcher's HTTP client refused to be born. The TLS stack wept.")?;
        Ok(Self { client })
    }

    /// 📡 GET `url`. Non-2xx is a `FetchFailed` before a single byte moves.
    pub async fn fetch(&self, url: &str) -> Result<impl AsyncRead + Send + Unpin + 'static, ParseError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ParseError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParseError::fetch(
                url,
                format!("replay host answered {status}"),
            ));
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(StreamReader::new(Box::pin(body)))
    }
}

/// 🔄 Copy decoded bytes into the chunk channel until EOF.
///
/// Returns the number of bytes pushed. If the receiving side hangs up early (the parser
/// request already failed), pumping stops quietly and the downstream error tells the story.
pub(crate) async fn pump<R>(
    reader: R,
    tx: Sender<io::Result<Bytes>>,
    url: &str,
) -> Result<u64, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = ReaderStream::new(reader);
    let mut pumped = 0u64;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                pumped += chunk.len() as u64;
                if tx.send(Ok(chunk)).await.is_err() {
                    trace!("🚪 downstream hung up, no point pumping further");
                    return Ok(pumped);
                }
            }
            Err(err) => {
                // -- poison the request body so the parser doesn't mistake a cut-off replay for a short one
                let _ = tx
                    .send(Err(io::Error::new(err.kind(), err.to_string())))
                    .await;
                return Err(ParseError::fetch(url, err));
            }
        }
    }
    Ok(pumped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_every_byte_makes_it_through_the_channel() -> anyhow::Result<()> {
        let (tx, rx) = async_channel::bounded::<io::Result<Bytes>>(1);
        let payload = vec![7u8; 20_000];
        let reader = std::io::Cursor::new(payload.clone());

        let drain = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Ok(chunk) = rx.recv().await {
                received.extend_from_slice(&chunk?);
            }
            io::Result::Ok(received)
        });

        let pumped = pump(reader, tx, "mem://replay").await?;
        assert_eq!(pumped, 20_000);
        assert_eq!(drain.await??, payload);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_listening() -> anyhow::Result<()> {
        let (tx, rx) = async_channel::bounded::<io::Result<Bytes>>(1);
        drop(rx);
        let pumped = pump(std::io::Cursor::new(vec![1u8; 10]), tx, "mem://replay").await?;
        assert_eq!(pumped, 10);
        Ok(())
    }
}
