//! Codec for encoding and decoding dashpulse frames.
//!
//! Frames are MessagePack maps (named fields, so optional fields can be omitted)
//! behind a 4-byte big-endian length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Trailing bytes after a complete frame.
    #[error("Unexpected {0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode exactly one frame from a complete message.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, carries trailing
/// bytes, or is not a valid frame.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = read_length(data)?;
    let total_size = LENGTH_PREFIX_SIZE + length;

    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }
    if data.len() > total_size {
        return Err(ProtocolError::TrailingBytes(data.len() - total_size));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let length = match read_length(buf) {
        Ok(length) => length,
        Err(ProtocolError::Incomplete(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

fn read_length(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{DashboardType, NotificationKind, NotificationPayload, Priority};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut data = BTreeMap::new();
        data.insert("revenue".to_string(), json!([1.5, 2.5, 3.0]));
        data.insert("kpis".to_string(), json!({"churn": 0.02, "nps": 41}));

        let frames = vec![
            Frame::connect(0x10, "token-123"),
            Frame::connected("conn-1", 0x10, 30_000),
            Frame::subscribe(
                "sub-1",
                DashboardType::Financial,
                json!({"region": ["eu", "us"], "quarter": 3}),
                vec!["revenue".into(), "kpis".into()],
                Some(10_000),
            ),
            Frame::DashboardData {
                dashboard_type: DashboardType::Financial,
                data,
                timestamp: 1_700_000_000_000,
                filters: json!({"region": ["eu", "us"]}),
                is_initial: true,
            },
            Frame::SubscriptionError {
                error: "forbidden".into(),
                subscription_id: Some("sub-1".into()),
                details: Some(json!({"code": 403})),
            },
            Frame::DashboardNotification(NotificationPayload {
                kind: NotificationKind::AnomalyDetected,
                title: "Spike".into(),
                message: "Orders spiked".into(),
                data: None,
                priority: Priority::High,
                dashboard_type: Some(DashboardType::Operational),
                timestamp: 9,
            }),
            Frame::ping(17),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::unsubscribe("sub-1");
        let encoded = encode(&frame).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut buf = BytesMut::new();
        encode_into(&Frame::ping(1), &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0]);

        match decode(&buf) {
            Err(ProtocolError::TrailingBytes(2)) => {}
            other => panic!("Expected TrailingBytes error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::unsubscribe("sub-1");
        let frame2 = Frame::pong(Some(5));

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        let decoded1 = decode_from(&mut buf).unwrap().unwrap();
        let decoded2 = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);
        assert!(buf.is_empty());
        assert!(decode_from(&mut buf).unwrap().is_none());
    }
}
