use std::io;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::stream::ByteStream;

/// Aggregating reader over a forward-only byte stream.
///
/// `read` either fills the whole request or returns a short count because
/// the stream ended. Cancellation is reported the same way as end of
/// stream; callers that care check the token.
pub struct FrameReader {
    source: ByteStream,
    cancel: CancellationToken,
    read_ahead: Box<[u8]>,
    start: usize,
    end: usize,
    position: u64,
    finished: bool,
}

impl FrameReader {
    pub fn new(source: ByteStream, read_ahead_bytes: usize, cancel: CancellationToken) -> Self {
        Self {
            source,
            cancel,
            read_ahead: vec![0u8; read_ahead_bytes.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
            position: 0,
            finished: false,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            if self.start == self.end {
                match self.refill().await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        // bytes already copied out still count as delivered
                        self.position += filled as u64;
                        return Err(e);
                    }
                }
            }

            let n = (self.end - self.start).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.read_ahead[self.start..self.start + n]);
            self.start += n;
            filled += n;
        }

        self.position += filled as u64;
        Ok(filled)
    }

    /// Total bytes handed out so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.start == self.end
    }

    /// Pull the next chunk from the source. Returns false once the source
    /// is exhausted or the token fired.
    async fn refill(&mut self) -> io::Result<bool> {
        if self.finished {
            return Ok(false);
        }

        let cancel = &self.cancel;
        let source = &mut self.source;
        let read_ahead = &mut self.read_ahead;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = source.read(read_ahead) => Some(result),
        };

        match outcome {
            None => {
                log::trace!("Read cancelled at byte {}", self.position);
                self.finished = true;
                Ok(false)
            }
            Some(Ok(0)) => {
                self.finished = true;
                Ok(false)
            }
            Some(Ok(n)) => {
                self.start = 0;
                self.end = n;
                Ok(true)
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
        }
    }
}
