use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

pub const PANEL_SIZE: usize = 128;
pub const PANEL_PIXEL_BYTES: usize = PANEL_SIZE * PANEL_SIZE * 3;

pub const DEFAULT_NUM_PANELS: usize = 840;
pub const DEFAULT_GRID_COLS: usize = 28;
pub const DEFAULT_GRID_ROWS: usize = 30;

/// Inbound frames larger than this are rejected by the transport layer
/// before they ever reach the decoder.
pub const MAX_FRAME_SIZE: usize = 512;

/// Wire protocol generation. Version 2 uses a two-byte panel index and a
/// zlib-compressed PanelSync payload; the color carried by Update frames
/// is governed by [`ColorMode`], which is a process-wide setting rather
/// than a per-message choice.
pub const PROTOCOL_VERSION: u8 = 2;

// Message type constants:
pub const MSG_UPDATE: u8 = 1; // Client → Server: 5 bytes: type, panel (2), x, y (+ r, g, b under ClientDeclared)
pub const MSG_REQUEST: u8 = 2; // Client → Server: 3 bytes: type, panel (2)
pub const MSG_UPDATE_ACK: u8 = 3; // Server → Client: 2 bytes: type, result
pub const MSG_BROADCAST: u8 = 4; // Server → Client: 16 bytes: type, panel (2), x, y, r, g, b, timestamp (8)
pub const MSG_PANEL_SYNC: u8 = 5; // Server → Client: 3-byte header (type, panel (2)) + zlib(128×128×3 bytes)
pub const MSG_ASSIGN_COLOR: u8 = 6; // Server → Client: 4 bytes: type, r, g, b

/// UpdateAck result code for an accepted paint.
pub const ACK_ACCEPTED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Where the paint color of an Update comes from. Server-wide: mixing
/// modes across messages in one deployment would be a protocol break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// The server assigns a color per connection and Update frames are
    /// 5 bytes. Canonical for protocol version 2.
    #[default]
    ServerAssigned,
    /// Update frames carry three trailing color bytes (8 bytes total).
    ClientDeclared,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("message type {kind} requires {expected} bytes, got {actual}")]
    Truncated {
        kind: u8,
        expected: usize,
        actual: usize,
    },
}

/// Frames sent by a client. Trailing bytes beyond a frame's fixed layout
/// are ignored, matching the minimum-length checks of the reference
/// protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Update {
        panel: u16,
        x: u8,
        y: u8,
        /// Present only under [`ColorMode::ClientDeclared`].
        color: Option<Color>,
    },
    Request {
        panel: u16,
    },
}

impl ClientFrame {
    /// Minimum encoded length of an Update frame under the given mode.
    pub fn update_len(mode: ColorMode) -> usize {
        match mode {
            ColorMode::ServerAssigned => 5,
            ColorMode::ClientDeclared => 8,
        }
    }

    pub fn decode(data: &[u8], mode: ColorMode) -> Result<Self, FrameError> {
        let kind = *data.first().ok_or(FrameError::Empty)?;
        match kind {
            MSG_UPDATE => {
                let expected = Self::update_len(mode);
                if data.len() < expected {
                    return Err(FrameError::Truncated {
                        kind,
                        expected,
                        actual: data.len(),
                    });
                }
                let panel = u16::from_be_bytes([data[1], data[2]]);
                let color = match mode {
                    ColorMode::ServerAssigned => None,
                    ColorMode::ClientDeclared => Some(Color::new(data[5], data[6], data[7])),
                };
                Ok(ClientFrame::Update {
                    panel,
                    x: data[3],
                    y: data[4],
                    color,
                })
            }
            MSG_REQUEST => {
                if data.len() < 3 {
                    return Err(FrameError::Truncated {
                        kind,
                        expected: 3,
                        actual: data.len(),
                    });
                }
                Ok(ClientFrame::Request {
                    panel: u16::from_be_bytes([data[1], data[2]]),
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }

    pub fn encode(&self, mode: ColorMode) -> Vec<u8> {
        match self {
            ClientFrame::Update { panel, x, y, color } => {
                let mut buf = Vec::with_capacity(Self::update_len(mode));
                buf.push(MSG_UPDATE);
                buf.extend_from_slice(&panel.to_be_bytes());
                buf.push(*x);
                buf.push(*y);
                if mode == ColorMode::ClientDeclared {
                    let c = color.unwrap_or(Color::new(0, 0, 0));
                    buf.extend_from_slice(&[c.r, c.g, c.b]);
                }
                buf
            }
            ClientFrame::Request { panel } => {
                let mut buf = Vec::with_capacity(3);
                buf.push(MSG_REQUEST);
                buf.extend_from_slice(&panel.to_be_bytes());
                buf
            }
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    UpdateAck {
        result: u8,
    },
    Broadcast {
        panel: u16,
        x: u8,
        y: u8,
        color: Color,
        timestamp: u64,
    },
    /// `payload` is the zlib-compressed panel raster; decompressed it is
    /// exactly [`PANEL_PIXEL_BYTES`] of RGB triples, row-major.
    PanelSync {
        panel: u16,
        payload: Vec<u8>,
    },
    AssignColor {
        color: Color,
    },
}

impl ServerFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerFrame::UpdateAck { result } => vec![MSG_UPDATE_ACK, *result],
            ServerFrame::Broadcast {
                panel,
                x,
                y,
                color,
                timestamp,
            } => {
                let mut buf = Vec::with_capacity(16);
                buf.push(MSG_BROADCAST);
                buf.extend_from_slice(&panel.to_be_bytes());
                buf.push(*x);
                buf.push(*y);
                buf.extend_from_slice(&[color.r, color.g, color.b]);
                buf.extend_from_slice(&timestamp.to_be_bytes());
                buf
            }
            ServerFrame::PanelSync { panel, payload } => {
                let mut buf = Vec::with_capacity(3 + payload.len());
                buf.push(MSG_PANEL_SYNC);
                buf.extend_from_slice(&panel.to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            ServerFrame::AssignColor { color } => {
                vec![MSG_ASSIGN_COLOR, color.r, color.g, color.b]
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let kind = *data.first().ok_or(FrameError::Empty)?;
        match kind {
            MSG_UPDATE_ACK => {
                if data.len() < 2 {
                    return Err(FrameError::Truncated {
                        kind,
                        expected: 2,
                        actual: data.len(),
                    });
                }
                Ok(ServerFrame::UpdateAck { result: data[1] })
            }
            MSG_BROADCAST => {
                if data.len() < 16 {
                    return Err(FrameError::Truncated {
                        kind,
                        expected: 16,
                        actual: data.len(),
                    });
                }
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&data[8..16]);
                Ok(ServerFrame::Broadcast {
                    panel: u16::from_be_bytes([data[1], data[2]]),
                    x: data[3],
                    y: data[4],
                    color: Color::new(data[5], data[6], data[7]),
                    timestamp: u64::from_be_bytes(ts),
                })
            }
            MSG_PANEL_SYNC => {
                if data.len() < 3 {
                    return Err(FrameError::Truncated {
                        kind,
                        expected: 3,
                        actual: data.len(),
                    });
                }
                Ok(ServerFrame::PanelSync {
                    panel: u16::from_be_bytes([data[1], data[2]]),
                    payload: data[3..].to_vec(),
                })
            }
            MSG_ASSIGN_COLOR => {
                if data.len() < 4 {
                    return Err(FrameError::Truncated {
                        kind,
                        expected: 4,
                        actual: data.len(),
                    });
                }
                Ok(ServerFrame::AssignColor {
                    color: Color::new(data[1], data[2], data[3]),
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Compresses a raw panel raster for a PanelSync payload.
pub fn compress_panel(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    encoder.write_all(raw).expect("write to Vec");
    encoder.finish().expect("finish to Vec")
}

/// Decompresses a PanelSync payload. The result must be exactly
/// [`PANEL_PIXEL_BYTES`] long; anything else is reported as invalid data.
pub fn decompress_panel(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(PANEL_PIXEL_BYTES);
    let mut decoder = ZlibDecoder::new(payload);
    decoder
        .take(PANEL_PIXEL_BYTES as u64 + 1)
        .read_to_end(&mut raw)?;
    if raw.len() != PANEL_PIXEL_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "panel payload decompressed to {} bytes, expected {}",
                raw.len(),
                PANEL_PIXEL_BYTES
            ),
        ));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_roundtrip_server_assigned() {
        let frame = ClientFrame::Update {
            panel: 5,
            x: 10,
            y: 20,
            color: None,
        };
        let encoded = frame.encode(ColorMode::ServerAssigned);
        assert_eq!(encoded.len(), 5);
        assert_eq!(encoded[0], MSG_UPDATE);

        let decoded = ClientFrame::decode(&encoded, ColorMode::ServerAssigned).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_update_roundtrip_client_declared() {
        let frame = ClientFrame::Update {
            panel: 839,
            x: 127,
            y: 0,
            color: Some(Color::new(12, 34, 56)),
        };
        let encoded = frame.encode(ColorMode::ClientDeclared);
        assert_eq!(encoded.len(), 8);

        let decoded = ClientFrame::decode(&encoded, ColorMode::ClientDeclared).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_update_truncated_under_client_declared() {
        // A 5-byte update is valid server-assigned but short of the
        // 8 bytes the client-declared layout requires.
        let frame = ClientFrame::Update {
            panel: 1,
            x: 2,
            y: 3,
            color: None,
        };
        let encoded = frame.encode(ColorMode::ServerAssigned);

        let err = ClientFrame::decode(&encoded, ColorMode::ClientDeclared).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                kind: MSG_UPDATE,
                expected: 8,
                actual: 5,
            }
        );
    }

    #[test]
    fn test_request_roundtrip() {
        let frame = ClientFrame::Request { panel: 513 };
        let encoded = frame.encode(ColorMode::ServerAssigned);
        assert_eq!(encoded, vec![MSG_REQUEST, 2, 1]);

        let decoded = ClientFrame::decode(&encoded, ColorMode::ServerAssigned).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_panel_index_is_big_endian() {
        let encoded = ClientFrame::Request { panel: 0x0102 }.encode(ColorMode::ServerAssigned);
        assert_eq!(&encoded[1..3], &[0x01, 0x02]);
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(
            ClientFrame::decode(&[], ColorMode::ServerAssigned),
            Err(FrameError::Empty)
        );
        assert_eq!(ServerFrame::decode(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            ClientFrame::decode(&[99, 0, 0], ColorMode::ServerAssigned),
            Err(FrameError::UnknownType(99))
        );
        assert_eq!(ServerFrame::decode(&[0]), Err(FrameError::UnknownType(0)));
    }

    #[test]
    fn test_decode_truncated_request() {
        let err = ClientFrame::decode(&[MSG_REQUEST, 1], ColorMode::ServerAssigned).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                kind: MSG_REQUEST,
                expected: 3,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut encoded = ClientFrame::Request { panel: 7 }.encode(ColorMode::ServerAssigned);
        encoded.push(0xFF);
        let decoded = ClientFrame::decode(&encoded, ColorMode::ServerAssigned).unwrap();
        assert_eq!(decoded, ClientFrame::Request { panel: 7 });
    }

    #[test]
    fn test_broadcast_layout() {
        let frame = ServerFrame::Broadcast {
            panel: 5,
            x: 10,
            y: 20,
            color: Color::new(1, 2, 3),
            timestamp: 0x0102030405060708,
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), 16);
        assert_eq!(encoded[0], MSG_BROADCAST);
        assert_eq!(&encoded[1..3], &[0, 5]);
        assert_eq!(encoded[3], 10);
        assert_eq!(encoded[4], 20);
        assert_eq!(&encoded[5..8], &[1, 2, 3]);
        assert_eq!(&encoded[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(ServerFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_assign_color_roundtrip() {
        let frame = ServerFrame::AssignColor {
            color: Color::new(200, 100, 50),
        };
        let encoded = frame.encode();
        assert_eq!(encoded, vec![MSG_ASSIGN_COLOR, 200, 100, 50]);
        assert_eq!(ServerFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_update_ack_roundtrip() {
        let encoded = ServerFrame::UpdateAck {
            result: ACK_ACCEPTED,
        }
        .encode();
        assert_eq!(encoded, vec![MSG_UPDATE_ACK, ACK_ACCEPTED]);
        assert_eq!(
            ServerFrame::decode(&encoded).unwrap(),
            ServerFrame::UpdateAck {
                result: ACK_ACCEPTED
            }
        );
    }

    #[test]
    fn test_panel_sync_roundtrip_with_compression() {
        let mut raw = vec![0u8; PANEL_PIXEL_BYTES];
        // A recognizable pattern so decompression mismatches would show.
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }

        let frame = ServerFrame::PanelSync {
            panel: 5,
            payload: compress_panel(&raw),
        };
        let encoded = frame.encode();

        match ServerFrame::decode(&encoded).unwrap() {
            ServerFrame::PanelSync { panel, payload } => {
                assert_eq!(panel, 5);
                let decompressed = decompress_panel(&payload).unwrap();
                assert_eq!(decompressed.len(), PANEL_PIXEL_BYTES);
                assert_eq!(decompressed, raw);
            }
            other => panic!("wrong frame type: {:?}", other),
        }
    }

    #[test]
    fn test_compression_shrinks_uniform_panel() {
        let raw = vec![42u8; PANEL_PIXEL_BYTES];
        let compressed = compress_panel(&raw);
        assert!(compressed.len() < raw.len() / 10);
    }

    #[test]
    fn test_decompress_rejects_wrong_length() {
        let compressed = compress_panel(&vec![0u8; 16]);
        assert!(decompress_panel(&compressed).is_err());

        let oversized = {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&vec![0u8; PANEL_PIXEL_BYTES + 1]).unwrap();
            encoder.finish().unwrap()
        };
        assert!(decompress_panel(&oversized).is_err());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress_panel(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_grid_defaults_tile_exactly() {
        assert_eq!(DEFAULT_GRID_COLS * DEFAULT_GRID_ROWS, DEFAULT_NUM_PANELS);
    }
}
