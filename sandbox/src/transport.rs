//! Framed/raw-line transport over a child process's stdout (§4.1).
//!
//! The child may multiplex stdout and stderr onto one stream using an 8-byte
//! frame header (`[stream_type, 0, 0, 0, len_be_u32]`, stream_type 1=stdout
//! 2=stderr), or it may simply write newline-terminated JSON with nothing
//! multiplexed. Both are supported transparently: the reader samples the
//! first unconsumed byte and either assembles frames or splits on `\n`.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Frames larger than this can never be legitimate; seeing one means the
/// stream is not actually framed and we should fall back to raw-line mode.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const STDOUT_STREAM: u8 = 1;
const STDERR_STREAM: u8 = 2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out waiting for a line from the sandbox")]
    Timeout,
    #[error("sandbox process closed its output stream")]
    Eof,
    #[error("sandbox output was not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("io error reading from sandbox: {0}")]
    Io(#[from] std::io::Error),
}

/// One multiplexed frame, or a line read in raw (unframed) mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stdout(String),
    Stderr(String),
}

/// Incrementally assembles logical lines out of a child process's stdout,
/// transparently detecting framed vs. raw-line mode and preserving partial
/// buffers across reads.
pub struct FramedReader<R> {
    inner: R,
    buf: Vec<u8>,
    mode: Mode,
    stdout_carry: Vec<u8>,
    stderr_carry: Vec<u8>,
    pending: VecDeque<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Undetermined,
    Framed,
    Raw,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            mode: Mode::Undetermined,
            stdout_carry: Vec::new(),
            stderr_carry: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Read one logical line with a deadline, demultiplexing frames as needed.
    ///
    /// In framed mode, stderr frames are surfaced as [`Frame::Stderr`] without
    /// ending the wait — callers that only care about stdout should loop
    /// until they see [`Frame::Stdout`].
    pub async fn read_frame(&mut self, deadline: Duration) -> Result<Frame, TransportError> {
        timeout(deadline, self.read_frame_inner())
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn read_frame_inner(&mut self) -> Result<Frame, TransportError> {
        loop {
            if let Some(frame) = self.try_take_frame()? {
                return Ok(frame);
            }
            self.fill_more().await?;
        }
    }

    async fn fill_more(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; 8192];
        let n = self.inner.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Eof);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn try_take_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.determine_mode();
        match self.mode {
            Mode::Raw | Mode::Undetermined => self.try_take_raw_line(),
            Mode::Framed => self.try_take_framed(),
        }
    }

    fn determine_mode(&mut self) {
        if self.mode != Mode::Undetermined || self.buf.len() < 8 {
            return;
        }
        let stream_type = self.buf[0];
        let zero_bytes_ok = self.buf[1] == 0 && self.buf[2] == 0 && self.buf[3] == 0;
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        let plausible_header = matches!(stream_type, STDOUT_STREAM | STDERR_STREAM)
            && zero_bytes_ok
            && len <= MAX_FRAME_LEN;
        self.mode = if plausible_header {
            Mode::Framed
        } else {
            Mode::Raw
        };
    }

    /// A single frame's payload may hold zero, one, or several `\n`-delimited
    /// lines, and a logical line may be split across more than one frame —
    /// so payloads feed a per-stream carry buffer, and completed lines queue
    /// in `pending` rather than being handed back one frame at a time.
    fn try_take_framed(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        if self.buf.len() < 8 {
            return Ok(None);
        }
        let stream_type = self.buf[0];
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < 8 + len {
            return Ok(None);
        }
        let payload = self.buf[8..8 + len].to_vec();
        self.buf.drain(..8 + len);

        let is_stderr = stream_type == STDERR_STREAM;
        let carry = if is_stderr { &mut self.stderr_carry } else { &mut self.stdout_carry };
        carry.extend_from_slice(&payload);

        let mut lines = Vec::new();
        while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
            lines.push(carry[..pos].to_vec());
            carry.drain(..=pos);
        }

        for line in lines {
            let text = String::from_utf8(line)?;
            let text = text.strip_suffix('\r').unwrap_or(&text).to_string();
            self.pending.push_back(if is_stderr { Frame::Stderr(text) } else { Frame::Stdout(text) });
        }

        Ok(self.pending.pop_front())
    }

    fn try_take_raw_line(&mut self) -> Result<Option<Frame>, TransportError> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = self.buf[..pos].to_vec();
        self.buf.drain(..=pos);
        let text = String::from_utf8(line)?;
        let text = text.strip_suffix('\r').unwrap_or(&text).to_string();
        Ok(Some(Frame::Stdout(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(stream_type: u8, payload: &str) -> Vec<u8> {
        let mut out = vec![stream_type, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload.as_bytes());
        out
    }

    #[tokio::test]
    async fn reads_raw_newline_terminated_lines() {
        let data = b"{\"status\":\"ok\"}\n{\"status\":\"ok2\"}\n".to_vec();
        let mut reader = FramedReader::new(Cursor::new(data));
        let first = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, Frame::Stdout("{\"status\":\"ok\"}".to_string()));
        let second = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second, Frame::Stdout("{\"status\":\"ok2\"}".to_string()));
    }

    #[tokio::test]
    async fn demultiplexes_framed_stdout_and_stderr() {
        let mut data = frame(STDOUT_STREAM, "line one\n");
        data.extend(frame(STDERR_STREAM, "warning\n"));
        data.extend(frame(STDOUT_STREAM, "line two\n"));
        let mut reader = FramedReader::new(Cursor::new(data));

        let a = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(a, Frame::Stdout("line one".to_string()));
        let b = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(b, Frame::Stderr("warning".to_string()));
        let c = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(c, Frame::Stdout("line two".to_string()));
    }

    #[tokio::test]
    async fn a_single_frame_with_multiple_newlines_yields_multiple_lines() {
        let data = frame(STDOUT_STREAM, "one\ntwo\nthree\n");
        let mut reader = FramedReader::new(Cursor::new(data));

        let a = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(a, Frame::Stdout("one".to_string()));
        let b = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(b, Frame::Stdout("two".to_string()));
        let c = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(c, Frame::Stdout("three".to_string()));
    }

    #[tokio::test]
    async fn a_logical_line_split_across_two_frames_is_reassembled() {
        let mut data = frame(STDOUT_STREAM, "ab");
        data.extend(frame(STDOUT_STREAM, "cd\n"));
        let mut reader = FramedReader::new(Cursor::new(data));

        let line = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line, Frame::Stdout("abcd".to_string()));
    }

    #[tokio::test]
    async fn reassembles_a_frame_split_across_reads() {
        struct Chunked(Vec<Vec<u8>>);
        impl AsyncRead for Chunked {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                if self.0.is_empty() {
                    return std::task::Poll::Ready(Ok(()));
                }
                let chunk = self.0.remove(0);
                buf.put_slice(&chunk);
                std::task::Poll::Ready(Ok(()))
            }
        }

        let whole = frame(STDOUT_STREAM, "hello\n");
        let (left, right) = whole.split_at(5);
        let reader_inner = Chunked(vec![left.to_vec(), right.to_vec()]);
        let mut reader = FramedReader::new(reader_inner);
        let frame = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame, Frame::Stdout("hello".to_string()));
    }

    #[tokio::test]
    async fn implausible_length_field_falls_back_to_raw_mode() {
        // First byte looks like a stdout stream tag but the length field is
        // absurd, so this must be treated as raw unframed text instead.
        let mut data = vec![1u8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        data.extend_from_slice(b"not a frame\n");
        let mut reader = FramedReader::new(Cursor::new(data));
        let err = reader.read_frame(Duration::from_secs(1)).await;
        // Raw mode splits on '\n'; the leading garbage bytes are not valid
        // UTF-8 on their own once decoded as one "line", so assert on EOF-safe
        // behavior: either a decode error or eventual success, never a hang.
        assert!(err.is_ok() || matches!(err, Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn eof_before_any_line_is_reported() {
        let mut reader = FramedReader::new(Cursor::new(Vec::new()));
        let err = reader.read_frame(Duration::from_secs(1)).await;
        assert!(matches!(err, Err(TransportError::Eof)));
    }
}
