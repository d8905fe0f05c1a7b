//! Line-delimited JSON transport.
//!
//! Each input line is an [`InboundMessage`]; each completion is written as one
//! [`OutboundMessage`] line. End of input tears the connection down, which
//! releases every lock it still holds, and the writer drains the remaining
//! completions before `serve` returns. Lines that are not valid UTF-8 JSON
//! are logged and skipped; a read error ends input the same way EOF does and
//! is reported once the writer has drained.

use anyhow::{Context, Result};
use cache_storage_core::{
    BrokerConfig, CacheConnectionBroker, ChannelSink, EngineProvider, InboundMessage,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub async fn serve<R, W>(
    mut input: R,
    output: W,
    engines: Arc<dyn EngineProvider>,
    config: BrokerConfig,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut responses) = ChannelSink::new();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(message) = responses.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok::<W, anyhow::Error>(output)
    });

    let mut broker = CacheConnectionBroker::new(engines, Arc::new(sink), config);
    tracing::info!(connection = %broker.connection_id(), "connection opened");

    let mut line = Vec::new();
    let mut dispatched = 0u64;
    let read_result = loop {
        line.clear();
        match input.read_until(b'\n', &mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(e),
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<InboundMessage>(&line) {
            Ok(message) => {
                broker.dispatch(message.session, message.request);
                dispatched += 1;
            }
            Err(e) => tracing::warn!(error = %e, "skipping malformed request line"),
        }
    };

    tracing::info!(
        connection = %broker.connection_id(),
        requests = dispatched,
        "input closed, tearing down connection"
    );
    drop(broker);

    let output = writer.await.context("response writer panicked")??;
    read_result.context("failed to read request")?;
    Ok(output)
}
