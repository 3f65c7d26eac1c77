use kontur_core::{codec, Packet};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on one input line, terminator excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Raw bytes without the terminator.
    Complete(Vec<u8>),
    /// Longer than the cap; its bytes were skipped.
    Oversized,
}

/// Line reader over the organ's input stream.
pub struct PacketReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: AsyncBufRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
            max_line: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Next line, `None` at end of input.
    ///
    /// Bytes are returned as-is so invalid UTF-8 costs one line, not the stream.
    /// At most `max_line` bytes plus the terminator are ever buffered.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        self.buf.clear();
        let limit = self.max_line as u64 + 1;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.len() > self.max_line && self.buf.last() != Some(&b'\n') {
            self.buf.clear();
            self.skip_rest_of_line().await?;
            return Ok(Some(Line::Oversized));
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(Line::Complete(std::mem::take(&mut self.buf))))
    }

    async fn skip_rest_of_line(&mut self) -> std::io::Result<()> {
        loop {
            let (used, done) = {
                let available = self.inner.fill_buf().await?;
                if available.is_empty() {
                    return Ok(());
                }
                match available.iter().position(|b| *b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                }
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

/// Writes sealed packets, one per line, flushing after each.
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, mut packet: Packet) -> anyhow::Result<()> {
        let line = codec::encode(&mut packet)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
