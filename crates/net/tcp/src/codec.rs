//! Wire framing: a big-endian u32 length prefix followed by a postcard payload.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use peerlink_net::ChannelError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

pub struct WireCodec<M> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn() -> M>,
}

impl<M> WireCodec<M> {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_size)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<M: Serialize> Encoder<M> for WireCodec<M> {
    type Error = ChannelError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload =
            postcard::to_allocvec(&item).map_err(|e| ChannelError::Encode(e.to_string()))?;
        Encoder::<Bytes>::encode(&mut self.frames, Bytes::from(payload), dst)?;
        Ok(())
    }
}

impl<M: DeserializeOwned> Decoder for WireCodec<M> {
    type Item = M;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => postcard::from_bytes(&frame)
                .map(Some)
                .map_err(|e| ChannelError::Decode(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Wire {
        Text(String),
        Heartbeat(u64),
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = WireCodec::<Wire>::new(1024);
        let mut full = BytesMut::new();
        codec.encode(Wire::Text("hello".into()), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(full);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(Wire::Text("hello".into())));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_consecutive_frames() {
        let mut codec = WireCodec::<Wire>::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(Wire::Heartbeat(1), &mut buf).unwrap();
        codec.encode(Wire::Heartbeat(2), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Wire::Heartbeat(1)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Wire::Heartbeat(2)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = WireCodec::<Wire>::new(8);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Wire::Text("far too long for eight bytes".into()), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Io(_)));

        let mut incoming = BytesMut::new();
        incoming.put_u32(64);
        incoming.put_slice(&[0u8; 64]);
        assert!(matches!(codec.decode(&mut incoming), Err(ChannelError::Io(_))));
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let mut codec = WireCodec::<Wire>::new(1024);
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0xff);
        assert!(matches!(codec.decode(&mut buf), Err(ChannelError::Decode(_))));
    }
}
