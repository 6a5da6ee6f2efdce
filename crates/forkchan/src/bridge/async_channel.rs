//! Tokio-driven variant of [`MessageChannel`](super::channel::MessageChannel).

use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::net::UnixStream;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Framed, FramedParts};

use super::channel::ChannelError;
use super::codec::JsonCodec;

/// Same wire format and error taxonomy as the blocking channel, for callers that
/// already run inside a tokio runtime.
#[derive(Debug)]
pub struct AsyncMessageChannel {
    framed: Option<Framed<UnixStream, JsonCodec>>,
}

impl AsyncMessageChannel {
    pub(crate) fn from_parts(stream: UnixStream, codec: JsonCodec, read_buf: BytesMut) -> Self {
        let mut parts = FramedParts::new::<&serde_json::Value>(stream, codec);
        parts.read_buf = read_buf;
        Self {
            framed: Some(Framed::from_parts(parts)),
        }
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self::from_parts(stream, JsonCodec::new(), BytesMut::new())
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ChannelError> {
        let framed = self.framed.as_mut().ok_or(ChannelError::Closed)?;
        framed.send(value).await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        let framed = self.framed.as_mut().ok_or(ChannelError::Closed)?;
        match framed.next().await {
            Some(Ok(frame)) => serde_json::from_slice(&frame).map_err(ChannelError::Malformed),
            // A half-received frame at EOF comes back from the codec as an I/O error.
            Some(Err(e)) => Err(e.into()),
            None => Err(ChannelError::Disconnected),
        }
    }

    pub fn close(&mut self) {
        self.framed = None;
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::MessageChannel;

    #[tokio::test]
    async fn async_pair_round_trips() {
        let (a, b) = MessageChannel::pair().unwrap();
        let mut a = a.into_async().unwrap();
        let mut b = b.into_async().unwrap();

        a.send(&serde_json::json!({"op": "add", "params": [1.0, 2.0]}))
            .await
            .unwrap();
        let got: serde_json::Value = b.recv().await.unwrap();

        assert_eq!(got["op"], "add");
        assert_eq!(got["params"][1], 2.0);
    }

    #[tokio::test]
    async fn bytes_buffered_by_blocking_side_carry_over() {
        let (mut a, mut b) = MessageChannel::pair().unwrap();

        a.send(&1u32).unwrap();
        a.send(&2u32).unwrap();
        // A single read picks up both frames; the second must survive the conversion.
        assert_eq!(b.recv::<u32>().unwrap(), 1);

        let mut b = b.into_async().unwrap();
        assert_eq!(b.recv::<u32>().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn peer_drop_reports_disconnect() {
        let (a, b) = MessageChannel::pair().unwrap();
        let mut b = b.into_async().unwrap();
        drop(a);

        assert!(matches!(
            b.recv::<u32>().await,
            Err(ChannelError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn closed_channel_rejects_use() {
        let (a, _b) = MessageChannel::pair().unwrap();
        let mut a = a.into_async().unwrap();
        a.close();

        assert!(a.is_closed());
        assert!(matches!(a.send(&0u8).await, Err(ChannelError::Closed)));
    }

    #[test]
    fn closed_blocking_channel_cannot_convert() {
        let (mut a, _b) = MessageChannel::pair().unwrap();
        a.close();
        assert!(matches!(a.into_async(), Err(ChannelError::Closed)));
    }
}
