//! Blocking message channel over one end of a Unix socket pair.

use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::async_channel::AsyncMessageChannel;
use super::codec::JsonCodec;

const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The local endpoint was closed with [`MessageChannel::close`].
    #[error("channel is closed")]
    Closed,
    /// The peer closed its end between messages.
    #[error("peer closed the channel")]
    Disconnected,
    /// The peer closed its end partway through a message; `pending` counts the bytes
    /// of the incomplete frame, length prefix included.
    #[error("peer closed the channel mid-message ({pending} bytes of an incomplete frame)")]
    Truncated { pending: usize },
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Typed, ordered, duplex message channel.
///
/// Each `send` produces exactly one frame, and each `recv` consumes exactly one, so
/// the k-th value sent on one side is the k-th value received on the other no matter
/// how the socket splits the bytes. Calls block the current thread.
#[derive(Debug)]
pub struct MessageChannel {
    stream: Option<UnixStream>,
    codec: JsonCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Bytes received since the last complete frame, including any length prefix the
    /// codec has already consumed.
    frame_bytes: usize,
}

impl MessageChannel {
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream: Some(stream),
            codec: JsonCodec::new(),
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            frame_bytes: 0,
        }
    }

    /// Wrap an owned descriptor that refers to a connected Unix stream socket.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self::from_stream(UnixStream::from(fd))
    }

    /// Connected pair of channels within the current process.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_stream(a), Self::from_stream(b)))
    }

    pub fn with_codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Serialize `value` and write it as a single frame.
    pub fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;

        self.write_buf.clear();
        self.codec.encode(value, &mut self.write_buf)?;
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        self.write_buf.clear();
        Ok(())
    }

    /// Block until the next frame arrives and deserialize it as `T`.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;

        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                // Whatever is still buffered belongs to the frames that follow.
                self.frame_bytes = self.read_buf.len();
                return serde_json::from_slice(&frame).map_err(ChannelError::Malformed);
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            match stream.read(&mut chunk) {
                Ok(0) if self.frame_bytes == 0 => return Err(ChannelError::Disconnected),
                Ok(0) => {
                    return Err(ChannelError::Truncated {
                        pending: self.frame_bytes,
                    });
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    self.frame_bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive the next value into an existing target.
    pub fn recv_into<T: DeserializeOwned>(&mut self, out: &mut T) -> Result<(), ChannelError> {
        *out = self.recv()?;
        Ok(())
    }

    /// Bound how long `recv` waits for bytes; `None` blocks indefinitely.
    ///
    /// A timed-out read surfaces as [`ChannelError::Io`] with kind `WouldBlock` or
    /// `TimedOut` depending on the platform. Partially received frames stay buffered.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let stream = self.stream.as_ref().ok_or(ChannelError::Closed)?;
        stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Release the descriptor. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::trace!("Message channel closed");
        }
        self.read_buf.clear();
        self.write_buf.clear();
        self.frame_bytes = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Hand the endpoint to tokio. Must be called from within a runtime.
    ///
    /// Bytes already buffered by earlier blocking reads carry over.
    pub fn into_async(mut self) -> Result<AsyncMessageChannel, ChannelError> {
        let stream = self.stream.take().ok_or(ChannelError::Closed)?;
        stream.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(stream)?;
        let codec = std::mem::take(&mut self.codec);
        let read_buf = std::mem::take(&mut self.read_buf);
        Ok(AsyncMessageChannel::from_parts(stream, codec, read_buf))
    }
}
