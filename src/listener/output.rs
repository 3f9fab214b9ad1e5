//! Line reading for chunked subprocess output.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Reads complete lines from a subprocess pipe.
///
/// Reads may end mid-line or mid-character; the unfinished tail is kept in
/// `pending` until the newline arrives or the pipe closes, so a line is
/// never split. `next_line` can be dropped inside `select!` and called
/// again without losing bytes.
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next line without its line ending, or `None` once the pipe is closed
    /// and nothing is left.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.inner.read_until(b'\n', &mut self.pending).await?;
        if self.pending.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.pending);
        Ok(Some(decode_line(&raw)))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
