use std::io;
use std::time::Duration;

use anyhow::Context;
use async_channel::Receiver;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::trace;

use crate::errors::ParseError;
use crate::pipeline::EventStream;

/// 🧪 Talks to the external parser service.
///
/// The request body is the chunk channel itself, so bytes leave for the parser as soon as
/// the decoder produces them. The response is handed back unread: an NDJSON event stream
/// the reducer consumes line by line.
#[derive(Debug)]
pub struct ParserClient {
    client: reqwest::Client,
    parser_host: String,
}

impl ParserClient {
    pub fn new(parser_host: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("💀 The parser client refused to be born. TLS, probably. It's always TLS.")?;
        Ok(Self {
            client,
            parser_host: parser_host.to_string(),
        })
    }

    pub async fn submit(&self, chunks: Receiver<io::Result<Bytes>>) -> Result<EventStream, ParseError> {
        trace!(parser_host = %self.parser_host, "🧪 streaming replay to the parser");
        let response = self
            .client
            .post(&self.parser_host)
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(chunks))
            .send()
            .await
            .map_err(ParseError::parser)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParseError::parser(format!(
                "parser answered {status}: {body}"
            )));
        }

        let events = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(events))))
    }
}
