//! Bounded capture of subprocess output streams

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Bytes kept per captured stream
pub const CAPTURE_LIMIT_BYTES: usize = 64 * 1024;

const CHUNK_SIZE: usize = 8 * 1024;

/// Text captured from one stream of one process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    /// Captured prefix, decoded lossily
    pub text: String,
    /// Whether bytes past the limit were discarded
    pub truncated: bool,
    /// Bytes the process wrote to the stream
    pub total_bytes: u64,
}

impl CapturedOutput {
    /// First non-blank line
    pub fn first_line(&self) -> Option<&str> {
        self.text.lines().map(str::trim).find(|line| !line.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Human-readable note when the capture was cut short
    pub fn truncation_note(&self) -> Option<String> {
        self.truncated.then(|| {
            format!(
                "output truncated: kept {} of {} bytes",
                self.text.len(),
                self.total_bytes
            )
        })
    }
}

/// Read a stream to its end, keeping at most `limit` bytes
///
/// The stream is always drained so the writing process never blocks on a
/// full pipe. A read error ends the capture with whatever was read so far.
pub async fn capture<R>(mut reader: R, limit: usize) -> CapturedOutput
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut total: u64 = 0;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Stopped reading output stream: {}", e);
                break;
            }
        }
    }

    CapturedOutput {
        truncated: total > kept.len() as u64,
        text: String::from_utf8_lossy(&kept).into_owned(),
        total_bytes: total,
    }
}

/// Capture an optional stream; a missing stream yields an empty capture
pub(crate) async fn capture_opt<R>(reader: Option<R>, limit: usize) -> CapturedOutput
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => capture(reader, limit).await,
        None => CapturedOutput::default(),
    }
}
