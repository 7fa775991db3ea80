// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! Minimal Lower Layer Protocol framing
//!
//! ```text
//! +------+-----------------+------+------+
//! | 0x0B | HL7 payload ... | 0x1C | 0x0D |
//! +------+-----------------+------+------+
//! ```
//!
//! [`wrap`] and [`unwrap`] work on whole buffers; [`MllpCodec`] splits a byte stream into
//! payloads for use with `tokio_util::codec::Framed`.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{Error, Result};

pub const START_BLOCK: u8 = 0x0B;
pub const END_BLOCK: u8 = 0x1C;
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Bytes added around every payload
pub const FRAME_OVERHEAD: usize = 3;

/// Default upper bound on a decoded payload (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame a payload: `0x0B + payload + 0x1C 0x0D`
pub fn wrap(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    write_frame(payload, &mut frame);
    frame.freeze()
}

fn write_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + FRAME_OVERHEAD);
    dst.put_u8(START_BLOCK);
    dst.put_slice(payload);
    dst.put_u8(END_BLOCK);
    dst.put_u8(CARRIAGE_RETURN);
}

/// Payload of a single complete frame, or `None` if `frame` is not exactly one frame
pub fn unwrap(frame: &[u8]) -> Option<&[u8]> {
    match frame {
        [START_BLOCK, payload @ .., END_BLOCK, CARRIAGE_RETURN] => Some(payload),
        _ => None,
    }
}

/// Stream codec for MLLP frames
///
/// Bytes preceding a start block are discarded. A payload larger than `max_frame_size`
/// is a framing error.
#[derive(Debug, Clone)]
pub struct MllpCodec {
    max_frame_size: usize,
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MllpCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for MllpCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        // Resynchronise on the next start block.
        match src.iter().position(|&b| b == START_BLOCK) {
            Some(0) => {}
            Some(offset) => {
                warn!("Discarding {} bytes before MLLP start block", offset);
                let _ = src.split_to(offset);
            }
            None => {
                if !src.is_empty() {
                    warn!("Discarding {} bytes without MLLP start block", src.len());
                    src.clear();
                }
                return Ok(None);
            }
        }

        let end = src[1..]
            .windows(2)
            .position(|w| w == [END_BLOCK, CARRIAGE_RETURN]);

        match end {
            Some(payload_len) => {
                if payload_len > self.max_frame_size {
                    return Err(Error::Framing(format!(
                        "frame of {} bytes exceeds limit of {}",
                        payload_len, self.max_frame_size
                    )));
                }
                let frame = src.split_to(payload_len + FRAME_OVERHEAD);
                Ok(Some(frame.freeze().slice(1..1 + payload_len)))
            }
            None if src.len() > self.max_frame_size + FRAME_OVERHEAD => Err(Error::Framing(
                format!("no end block within {} bytes", self.max_frame_size),
            )),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::Framing(format!(
                "connection closed inside a frame ({} bytes pending)",
                src.len()
            ))),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for MllpCodec {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        write_frame(item.as_ref(), dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_is_bit_exact() {
        let frame = wrap(b"MSH|^~\\&|A\r");
        assert_eq!(frame[0], 0x0B);
        assert_eq!(&frame[frame.len() - 2..], &[0x1C, 0x0D]);
        assert_eq!(&frame[1..frame.len() - 2], b"MSH|^~\\&|A\r");
    }

    #[test]
    fn test_unwrap_rejects_partial_frames() {
        assert_eq!(unwrap(&[START_BLOCK, b'a', END_BLOCK]), None);
        assert_eq!(unwrap(b"abc"), None);
        assert_eq!(unwrap(&[START_BLOCK, END_BLOCK, CARRIAGE_RETURN]), Some(&b""[..]));
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let mut codec = MllpCodec::new();
        let mut buf = BytesMut::from(&[START_BLOCK, b'M', b'S'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[b'H', END_BLOCK, CARRIAGE_RETURN]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"MSH"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_skips_leading_noise_and_splits_frames() {
        let mut codec = MllpCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&wrap(b"one"));
        buf.extend_from_slice(&wrap(b"two"));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"two"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_end_block_without_carriage_return_is_payload() {
        let mut codec = MllpCodec::new();
        let mut buf = BytesMut::from(&[START_BLOCK, b'a', END_BLOCK, b'b', END_BLOCK, CARRIAGE_RETURN][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[b'a', END_BLOCK, b'b']);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = MllpCodec::with_max_frame_size(4);
        let mut buf = BytesMut::from(&wrap(b"too long")[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Framing(_))));

        let mut codec = MllpCodec::with_max_frame_size(4);
        let mut buf = BytesMut::from(&[START_BLOCK, 1, 2, 3, 4, 5, 6, 7, 8][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_eof_inside_frame_is_an_error() {
        let mut codec = MllpCodec::new();
        let mut buf = BytesMut::from(&[START_BLOCK, b'x'][..]);
        assert!(codec.decode_eof(&mut buf).is_err());
    }

    #[test]
    fn test_encoder_matches_wrap() {
        let mut codec = MllpCodec::new();
        let mut dst = BytesMut::new();
        codec.encode("MSH|x\r", &mut dst).unwrap();
        assert_eq!(dst.freeze(), wrap(b"MSH|x\r"));
    }

    proptest! {
        #[test]
        fn prop_unwrap_inverts_wrap(text in "[ -~\r]{0,512}") {
            let frame = wrap(text.as_bytes());
            prop_assert_eq!(unwrap(&frame), Some(text.as_bytes()));
        }

        #[test]
        fn prop_codec_recovers_payload(text in "[ -~\r]{0,512}") {
            let mut codec = MllpCodec::new();
            let mut buf = BytesMut::from(&wrap(text.as_bytes())[..]);
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&decoded[..], text.as_bytes());
        }
    }
}
