//! Bounded line reader for the control transport.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// Reads newline-terminated lines, keeping at most `max_len` bytes of each.
///
/// Bytes past the limit are discarded up to the next newline, so a sender
/// that never terminates its line cannot grow memory without bound.
pub struct LineReader<R> {
    inner: R,
    max_len: usize,
    line: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap `inner`, keeping at most `max_len` bytes per line.
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            max_len,
            line: Vec::with_capacity(max_len),
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    ///
    /// A trailing `\r` is stripped. Invalid UTF-8 is replaced lossily.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.line.clear();
        let mut read_any = false;
        let mut dropped = 0usize;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !read_any {
                    return Ok(None);
                }
                break;
            }
            read_any = true;

            let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };
            let room = self.max_len.saturating_sub(self.line.len());
            let keep = chunk.len().min(room);
            self.line.extend_from_slice(&chunk[..keep]);
            dropped += chunk.len() - keep;

            self.inner.consume(used);
            if done {
                break;
            }
        }

        if dropped > 0 {
            warn!(max_len = self.max_len, dropped, "Control line truncated");
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.line).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lines(input: &[u8], max_len: usize) -> Vec<String> {
        let mut reader = LineReader::new(input, max_len);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn splits_lines_and_strips_carriage_returns() {
        assert_eq!(
            lines(b"READ NOW\r\nSD F\n", 64).await,
            vec!["READ NOW", "SD F"]
        );
    }

    #[tokio::test]
    async fn final_unterminated_line_is_returned() {
        assert_eq!(lines(b"STATE ON\nSTATE OFF", 64).await, vec!["STATE ON", "STATE OFF"]);
    }

    #[tokio::test]
    async fn long_lines_are_truncated_and_remainder_discarded() {
        let mut input = b"SETT 1".to_vec();
        input.extend(std::iter::repeat(b'9').take(500));
        input.extend_from_slice(b"\nSD E\n");
        assert_eq!(lines(&input, 8).await, vec!["SETT 199", "SD E"]);
    }

    #[tokio::test]
    async fn blank_lines_are_kept() {
        assert_eq!(lines(b"\n\nSD F\n", 64).await, vec!["", "", "SD F"]);
    }

    #[tokio::test]
    async fn reassembles_across_buffer_boundaries() {
        let (client, server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(b"READBUFFER -1\nLOGGING ON\n").await.unwrap();
        });
        let mut reader = LineReader::new(tokio::io::BufReader::with_capacity(4, server), 64);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("READBUFFER -1"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("LOGGING ON"));
        writer.await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
