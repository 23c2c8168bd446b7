//! TFTP packet codec
//!
//! Pure serialization and deserialization of the five RFC 1350 packet
//! types. All integers on the wire are big-endian u16; filenames, mode
//! strings and error messages are NUL-terminated text.
//!
//! Packet format summary:
//! - RRQ/WRQ: | Opcode | Filename | 0 | Mode | 0 |
//! - DATA:    | Opcode | Block# | Data (0..512 bytes) |
//! - ACK:     | Opcode | Block# |
//! - ERROR:   | Opcode | ErrorCode | ErrMsg | 0 |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Largest payload a DATA packet may carry. A payload of exactly this size
/// means more blocks follow; anything shorter marks end of file.
pub const BLOCK_SIZE: usize = 512;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;

/// TFTP transfer modes
///
/// Only the two modes modern peers actually use. RFC 1350's "mail" mode is
/// obsolete and treated as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode ("octet"): data is transferred as-is.
    Octet,
    /// Text mode ("netascii"). Payload bytes are passed through opaquely;
    /// no line-ending translation is applied on either side.
    Netascii,
}

impl TransferMode {
    /// Parse a mode string from the wire. The comparison is case-insensitive.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::Netascii),
            _ => None,
        }
    }

    /// The wire representation of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::Netascii => "netascii",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TFTP error codes as defined in RFC 1350
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Error code 0: not defined, see error message.
    Undefined = 0,
    /// Error code 1: file not found.
    FileNotFound = 1,
    /// Error code 2: access violation. Also used for requests refused by the
    /// server mode policy or the path sandbox.
    AccessViolation = 2,
    /// Error code 3: disk full or allocation exceeded.
    DiskFull = 3,
    /// Error code 4: illegal TFTP operation.
    IllegalOperation = 4,
    /// Error code 5: unknown transfer ID (packet from an unexpected port).
    UnknownTransferId = 5,
    /// Error code 6: file already exists.
    FileAlreadyExists = 6,
    /// Error code 7: no such user.
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Default human-readable message for the code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// Reasons a datagram fails to decode as a TFTP packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet truncated")]
    Truncated,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("missing NUL terminator")]
    MissingTerminator,
    #[error("unknown transfer mode {0:?}")]
    UnknownMode(String),
    #[error("text field is not valid UTF-8")]
    InvalidText,
}

/// A single TFTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest { filename: String, mode: TransferMode },
    WriteRequest { filename: String, mode: TransferMode },
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
}

impl Packet {
    /// Short protocol name of the packet type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadRequest { .. } => "RRQ",
            Self::WriteRequest { .. } => "WRQ",
            Self::Data { .. } => "DATA",
            Self::Ack { .. } => "ACK",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Serialize the packet into a UDP payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ReadRequest { filename, mode } => encode_request(OP_RRQ, filename, *mode),
            Self::WriteRequest { filename, mode } => encode_request(OP_WRQ, filename, *mode),
            Self::Data { block, payload } => {
                let mut v = Vec::with_capacity(4 + payload.len());
                v.extend_from_slice(&OP_DATA.to_be_bytes());
                v.extend_from_slice(&block.to_be_bytes());
                v.extend_from_slice(payload);
                v
            }
            Self::Ack { block } => {
                let mut v = Vec::with_capacity(4);
                v.extend_from_slice(&OP_ACK.to_be_bytes());
                v.extend_from_slice(&block.to_be_bytes());
                v
            }
            Self::Error { code, message } => {
                let mut v = Vec::with_capacity(4 + message.len() + 1);
                v.extend_from_slice(&OP_ERROR.to_be_bytes());
                v.extend_from_slice(&code.as_u16().to_be_bytes());
                v.extend_from_slice(message.as_bytes());
                v.push(0);
                v
            }
        }
    }

    /// Deserialize a UDP payload.
    ///
    /// Decoding is passive about DATA payloads longer than [`BLOCK_SIZE`]
    /// (a session never emits one, but a peer's is accepted), ignores any
    /// RFC 2347 option bytes trailing an RRQ/WRQ mode string, and maps
    /// ERROR codes outside 0..=7 to [`ErrorCode::Undefined`].
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::Truncated);
        }

        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        match opcode {
            OP_RRQ | OP_WRQ => {
                let (filename, next) = read_string(buf, 2)?;
                let (mode_str, _) = read_string(buf, next)?;
                let mode = TransferMode::from_str_opt(&mode_str)
                    .ok_or(DecodeError::UnknownMode(mode_str))?;
                if opcode == OP_RRQ {
                    Ok(Self::ReadRequest { filename, mode })
                } else {
                    Ok(Self::WriteRequest { filename, mode })
                }
            }
            OP_DATA => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Self::Data {
                    block: u16::from_be_bytes([buf[2], buf[3]]),
                    payload: buf[4..].to_vec(),
                })
            }
            OP_ACK => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Self::Ack {
                    block: u16::from_be_bytes([buf[2], buf[3]]),
                })
            }
            OP_ERROR => {
                if buf.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                let raw = u16::from_be_bytes([buf[2], buf[3]]);
                let code = ErrorCode::from_u16(raw).unwrap_or(ErrorCode::Undefined);
                let (message, _) = read_string(buf, 4)?;
                Ok(Self::Error { code, message })
            }
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

fn encode_request(opcode: u16, filename: &str, mode: TransferMode) -> Vec<u8> {
    let mode_str = mode.as_str();
    let mut v = Vec::with_capacity(2 + filename.len() + 1 + mode_str.len() + 1);
    v.extend_from_slice(&opcode.to_be_bytes());
    v.extend_from_slice(filename.as_bytes());
    v.push(0);
    v.extend_from_slice(mode_str.as_bytes());
    v.push(0);
    v
}

/// Find the next NUL byte in `buf` at or after `start`.
fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..].iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Read a NUL-terminated string starting at `start`; returns the string and
/// the offset just past its terminator.
fn read_string(buf: &[u8], start: usize) -> Result<(String, usize), DecodeError> {
    let end = find_zero(buf, start).ok_or(DecodeError::MissingTerminator)?;
    let text = std::str::from_utf8(&buf[start..end]).map_err(|_| DecodeError::InvalidText)?;
    Ok((text.to_string(), end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_requests() {
        let rrq = Packet::ReadRequest {
            filename: "boot.img".to_string(),
            mode: TransferMode::Octet,
        };
        assert_eq!(Packet::decode(&rrq.encode()).unwrap(), rrq);

        let wrq = Packet::WriteRequest {
            filename: "upload.bin".to_string(),
            mode: TransferMode::Netascii,
        };
        assert_eq!(Packet::decode(&wrq.encode()).unwrap(), wrq);
    }

    #[test]
    fn round_trip_data_ack_error() {
        let data = Packet::Data {
            block: 7,
            payload: b"Hello, TFTP!".to_vec(),
        };
        assert_eq!(Packet::decode(&data.encode()).unwrap(), data);

        let empty = Packet::Data {
            block: 3,
            payload: Vec::new(),
        };
        assert_eq!(Packet::decode(&empty.encode()).unwrap(), empty);

        let ack = Packet::Ack { block: 65535 };
        assert_eq!(Packet::decode(&ack.encode()).unwrap(), ack);

        let error = Packet::Error {
            code: ErrorCode::FileNotFound,
            message: "boot.img not found".to_string(),
        };
        assert_eq!(Packet::decode(&error.encode()).unwrap(), error);
    }

    #[test]
    fn rrq_wire_layout() {
        let packet = Packet::ReadRequest {
            filename: "test.txt".to_string(),
            mode: TransferMode::Octet,
        };
        assert_eq!(packet.encode(), b"\x00\x01test.txt\0octet\0");
    }

    #[test]
    fn mode_string_is_case_insensitive() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        buf.extend_from_slice(b"a.txt\0NETASCII\0");

        match Packet::decode(&buf).unwrap() {
            Packet::ReadRequest { mode, .. } => assert_eq!(mode, TransferMode::Netascii),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn rrq_trailing_options_are_ignored() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        buf.extend_from_slice(b"boot.img\0octet\0blksize\01400\0");

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::ReadRequest {
                filename: "boot.img".to_string(),
                mode: TransferMode::Octet,
            }
        );
    }

    #[test]
    fn truncated_packets() {
        assert_eq!(Packet::decode(&[]), Err(DecodeError::Truncated));
        assert_eq!(Packet::decode(&[0]), Err(DecodeError::Truncated));
        // DATA with opcode only
        assert_eq!(Packet::decode(&[0, 3]), Err(DecodeError::Truncated));
        // ACK missing block number
        assert_eq!(Packet::decode(&[0, 4, 1]), Err(DecodeError::Truncated));
        // ERROR missing error code
        assert_eq!(Packet::decode(&[0, 5, 0]), Err(DecodeError::Truncated));
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(Packet::decode(&[0, 9, 0, 0]), Err(DecodeError::UnknownOpcode(9)));
        assert_eq!(Packet::decode(&[0xff, 0xff]), Err(DecodeError::UnknownOpcode(0xffff)));
    }

    #[test]
    fn missing_terminators() {
        // RRQ with unterminated filename
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        buf.extend_from_slice(b"test.txt");
        assert_eq!(Packet::decode(&buf), Err(DecodeError::MissingTerminator));

        // RRQ with unterminated mode
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        buf.extend_from_slice(b"test.txt\0octet");
        assert_eq!(Packet::decode(&buf), Err(DecodeError::MissingTerminator));

        // ERROR with unterminated message
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_ERROR.to_be_bytes());
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.extend_from_slice(b"denied");
        assert_eq!(Packet::decode(&buf), Err(DecodeError::MissingTerminator));
    }

    #[test]
    fn unknown_mode_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        buf.extend_from_slice(b"test.txt\0mail\0");
        assert_eq!(
            Packet::decode(&buf),
            Err(DecodeError::UnknownMode("mail".to_string()))
        );
    }

    #[test]
    fn oversized_data_decodes_passively() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_DATA.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&vec![0xaa; BLOCK_SIZE + 100]);

        match Packet::decode(&buf).unwrap() {
            Packet::Data { payload, .. } => assert_eq!(payload.len(), BLOCK_SIZE + 100),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn unknown_error_code_maps_to_undefined() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_ERROR.to_be_bytes());
        buf.extend_from_slice(&42u16.to_be_bytes());
        buf.extend_from_slice(b"strange\0");

        assert_eq!(
            Packet::decode(&buf).unwrap(),
            Packet::Error {
                code: ErrorCode::Undefined,
                message: "strange".to_string(),
            }
        );
    }

    #[test]
    fn error_code_conversion() {
        assert_eq!(ErrorCode::FileNotFound.as_u16(), 1);
        assert_eq!(ErrorCode::from_u16(5), Some(ErrorCode::UnknownTransferId));
        assert_eq!(ErrorCode::from_u16(8), None);
        assert_eq!(ErrorCode::AccessViolation.default_message(), "Access violation");
    }

    #[test]
    fn transfer_mode_parsing() {
        assert_eq!(TransferMode::from_str_opt("octet"), Some(TransferMode::Octet));
        assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
        assert_eq!(TransferMode::from_str_opt("NetAscii"), Some(TransferMode::Netascii));
        assert_eq!(TransferMode::from_str_opt("binary"), None);
        assert!("octet".parse::<TransferMode>().is_ok());
        assert!("mail".parse::<TransferMode>().is_err());
    }
}
