//! Line-delimited transport for MCP sessions.
//!
//! Every connection is a pair of directional halves carrying newline-framed
//! JSON-RPC messages:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//!
//! The same framing runs over stdio (stdin/stdout), TCP streams and
//! in-memory duplex pipes. Logging goes to stderr, never to the message
//! stream.
//!
//! # Thread Safety
//!
//! Reading and writing are independent. [`LineWriter::spawn`] moves the
//! writer into its own task fed by an unbounded queue so that concurrent
//! producers never interleave partial lines.

use std::io;

use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reading half: yields one message line at a time.
pub struct LineReader<R> {
    reader: R,
}

impl<R> LineReader<R>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    /// Wraps a buffered reader.
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if the peer closed its side (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }
}

/// Writing half: serialises messages as single lines.
pub struct LineWriter<W> {
    writer: W,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a raw JSON string with newline termination.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flushes and shuts the underlying writer down.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Moves the writer into a background task fed by a queue of encoded
    /// lines.
    ///
    /// The task ends once every sender is dropped, then shuts the writer
    /// down so the peer observes EOF.
    pub fn spawn(mut self) -> (mpsc::UnboundedSender<String>, JoinHandle<io::Result<()>>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = self.write_raw(&line).await {
                    tracing::debug!(error = %e, "Transport write failed");
                    return Err(e);
                }
            }
            // Peer may already be gone
            let _ = self.shutdown().await;
            Ok(())
        });

        (tx, task)
    }
}

/// Serialises a message into a single line (without the trailing newline).
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn encode_line<T: Serialize>(message: &T) -> io::Result<String> {
    serde_json::to_string(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Reader half over stdin.
pub type StdioReader = LineReader<BufReader<tokio::io::Stdin>>;

/// Writer half over stdout.
pub type StdioWriter = LineWriter<tokio::io::Stdout>;

/// Creates the stdio transport halves.
#[must_use]
pub fn stdio() -> (StdioReader, StdioWriter) {
    (
        LineReader::new(BufReader::new(tokio::io::stdin())),
        LineWriter::new(tokio::io::stdout()),
    )
}

/// Splits a bidirectional stream (TCP, duplex pipe) into transport halves.
pub fn split<S>(stream: S) -> (LineReader<BufReader<ReadHalf<S>>>, LineWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (LineReader::new(BufReader::new(read)), LineWriter::new(write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, OutgoingMessage, RequestId};

    #[tokio::test]
    async fn serialise_response_no_newlines() {
        let response = JsonRpcResponse::success(
            RequestId::Number(1),
            serde_json::json!({
                "message": "hello world",
                "nested": {"key": "value"}
            }),
        );

        let json = encode_line(&response).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }

    #[tokio::test]
    async fn serialise_error_no_newlines() {
        let error = JsonRpcError::method_not_found(RequestId::Number(1), "test/method");

        let json = encode_line(&OutgoingMessage::from(error)).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }

    #[tokio::test]
    async fn lines_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let (_a_reader, mut a_writer) = split(a);
        let (mut b_reader, _b_writer) = split(b);

        a_writer.write_raw(r#"{"x":1}"#).await.unwrap();
        a_writer.write_raw(r#"{"x":2}"#).await.unwrap();

        assert_eq!(b_reader.read_line().await.unwrap().as_deref(), Some(r#"{"x":1}"#));
        assert_eq!(b_reader.read_line().await.unwrap().as_deref(), Some(r#"{"x":2}"#));
    }

    #[tokio::test]
    async fn crlf_is_stripped() {
        let input: &[u8] = b"{\"a\":true}\r\n";
        let mut reader = LineReader::new(BufReader::new(input));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"a\":true}"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn spawned_writer_closes_on_last_sender() {
        let (a, b) = tokio::io::duplex(1024);
        let (_a_reader, a_writer) = split(a);
        let (mut b_reader, _b_writer) = split(b);

        let (tx, task) = a_writer.spawn();
        tx.send("{}".to_string()).unwrap();
        drop(tx);

        task.await.unwrap().unwrap();
        assert_eq!(b_reader.read_line().await.unwrap().as_deref(), Some("{}"));
        assert_eq!(b_reader.read_line().await.unwrap(), None);
    }
}
