//! Bounded reading of `\n`-terminated frames from a client socket
//!
//! At most `max_len + 2` bytes of a line are ever buffered. The remainder of an
//! oversized line is consumed and thrown away so the next frame starts clean.

use std::io;
use std::mem;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// One unit read from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrame {
    /// A complete line, terminator stripped
    Line(String),
    /// A line longer than the limit; carries the bytes consumed
    Oversized(usize),
    /// A line within the limit that is not UTF-8
    NotUtf8,
}

pub struct LineReader<R> {
    reader: R,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            max_len,
            buf: Vec::new(),
        }
    }

    /// Next frame, or `None` once the peer has closed its side
    pub async fn next_frame(&mut self) -> io::Result<Option<ReadFrame>> {
        self.buf.clear();
        let limit = self.max_len as u64 + 2;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        if !self.buf.ends_with(b"\n") && read as u64 == limit {
            let discarded = self.discard_line().await?;
            return Ok(Some(ReadFrame::Oversized(read + discarded)));
        }

        if self.buf.ends_with(b"\n") {
            self.buf.pop();
            if self.buf.ends_with(b"\r") {
                self.buf.pop();
            }
        }
        if self.buf.len() > self.max_len {
            return Ok(Some(ReadFrame::Oversized(self.buf.len())));
        }

        match String::from_utf8(mem::take(&mut self.buf)) {
            Ok(line) => Ok(Some(ReadFrame::Line(line))),
            Err(_) => Ok(Some(ReadFrame::NotUtf8)),
        }
    }

    /// Consume up to and including the next `\n` without buffering it
    async fn discard_line(&mut self) -> io::Result<usize> {
        let mut discarded = 0;
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(discarded);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.reader.consume(end + 1);
                    return Ok(discarded + end + 1);
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                    discarded += len;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_are_stripped() {
        let mut reader = LineReader::new(&b"MSG|1|a|2|hi\r\nUSR|1|a|block\nlast"[..], 64);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("MSG|1|a|2|hi".to_string()))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("USR|1|a|block".to_string()))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("last".to_string()))
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let input = format!("{}\r\nok\r\n", "x".repeat(100));
        let mut reader = LineReader::new(input.as_bytes(), 8);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Oversized(102))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("ok".to_string()))
        );
    }

    #[tokio::test]
    async fn test_limit_applies_to_content_only() {
        let mut reader = LineReader::new(&b"12345678\r\n123456789\n"[..], 8);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("12345678".to_string()))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Oversized(9))
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_end_the_stream() {
        let mut reader = LineReader::new(&b"MSG|1|a|2|\xff\xfe\r\nnext\r\n"[..], 64);

        assert_eq!(reader.next_frame().await.unwrap(), Some(ReadFrame::NotUtf8));
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(ReadFrame::Line("next".to_string()))
        );
    }
}
