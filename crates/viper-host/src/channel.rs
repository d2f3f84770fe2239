use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::VisualizerError;

/// Line-oriented request/response connection to the engine.
///
/// Each protocol step is one newline-terminated line, answered by exactly one
/// reply line. Steps are strictly lock-step: the next line is only written
/// after the previous reply has been read.
pub struct ControlChannel<S = TcpStream> {
    stream: BufReader<S>,
}

impl<S> ControlChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Send one step and return the engine's reply with the line ending stripped.
    pub async fn submit(&mut self, step: &str) -> Result<String, VisualizerError> {
        self.stream.write_all(step.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;

        let mut reply = String::new();
        if self.stream.read_line(&mut reply).await? == 0 {
            return Err(VisualizerError::ProtocolIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "engine closed the control connection",
            )));
        }
        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Submit every step in order. A step whose exchange fails is logged and
    /// counted as acknowledged so the batch always runs to the end.
    pub async fn submit_all(&mut self, steps: &[String]) {
        for step in steps {
            match self.submit(step).await {
                Ok(reply) => tracing::debug!(step = %step, reply = %reply, "engine acknowledged"),
                Err(err) => tracing::warn!(step = %step, "no acknowledgement from engine: {err}"),
            }
        }
    }
}
