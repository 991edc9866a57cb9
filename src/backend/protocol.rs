//! MySQL wire packet framing and response parsing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// MySQL packet header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;

/// Commands the monitor sends.
pub mod command {
    pub const COM_QUIT: u8 = 0x01;
    pub const COM_QUERY: u8 = 0x03;
    pub const COM_PING: u8 = 0x0e;
}

/// Server error codes the monitor reacts to.
pub mod err_code {
    /// Access denied for user (bad credentials).
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    /// Access denied to the database.
    pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
    /// Table-level privilege missing.
    pub const ER_TABLEACCESS_DENIED_ERROR: u16 = 1142;
    /// Column-level privilege missing.
    pub const ER_COLUMNACCESS_DENIED_ERROR: u16 = 1143;
    /// Statement requires a privilege the user lacks.
    pub const ER_SPECIFIC_ACCESS_DENIED_ERROR: u16 = 1227;
    /// Routine-level privilege missing.
    pub const ER_PROCACCESS_DENIED_ERROR: u16 = 1370;
    /// KILL denied.
    pub const ER_KILL_DENIED_ERROR: u16 = 1095;
    /// Queried table does not exist on the server.
    pub const ER_UNKNOWN_TABLE: u16 = 1109;
}

/// MySQL wire protocol packet
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Build a command packet (sequence id 0, command byte + argument).
    pub fn command(cmd: u8, arg: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + arg.len());
        payload.push(cmd);
        payload.extend_from_slice(arg);
        Self::new(0, payload)
    }

    /// Encode packet to bytes (header + payload)
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        // 3 bytes for length (little endian)
        dst.put_u8((len & 0xFF) as u8);
        dst.put_u8(((len >> 8) & 0xFF) as u8);
        dst.put_u8(((len >> 16) & 0xFF) as u8);
        dst.put_u8(self.sequence_id);
        dst.extend_from_slice(&self.payload);
    }

    /// Try to decode packet from bytes, returns None if not enough data
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }

        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
        let total_len = PACKET_HEADER_SIZE + len;
        if src.len() < total_len {
            return None;
        }

        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Some(Self {
            sequence_id,
            payload,
        })
    }
}

/// MySQL packet codec for use with tokio Framed
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Packet::decode(src))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

pub fn is_ok_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0x00
}

pub fn is_err_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFF
}

/// EOF marker: 0xFE header with a short payload.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFE && payload.len() < 9
}

/// Parsed server ERR packet
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub error_message: String,
}

impl ErrPacket {
    /// Parse from packet payload; the 5-byte SQL state marker is skipped
    /// when present.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 || payload[0] != 0xFF {
            return None;
        }

        let mut buf = &payload[1..];
        let error_code = buf.get_u16_le();

        if !buf.is_empty() && buf[0] == b'#' {
            let skip = buf.len().min(6);
            buf.advance(skip);
        }

        Some(Self {
            error_code,
            error_message: String::from_utf8_lossy(buf).to_string(),
        })
    }
}

/// Parse a length-encoded integer, returning the value and bytes consumed.
pub fn parse_lenenc_int(data: &[u8]) -> Option<(u64, usize)> {
    match data.first()? {
        b @ 0..=0xFA => Some((*b as u64, 1)),
        0xFC if data.len() >= 3 => Some((u16::from_le_bytes([data[1], data[2]]) as u64, 3)),
        0xFD if data.len() >= 4 => {
            Some((u32::from_le_bytes([data[1], data[2], data[3], 0]) as u64, 4))
        }
        0xFE if data.len() >= 9 => Some((
            u64::from_le_bytes([
                data[1], data[2], data[3], data[4], data[5], data[6], data[7], data[8],
            ]),
            9,
        )),
        _ => None,
    }
}

/// Parse a length-encoded string column value. `None` value means SQL NULL.
pub fn parse_lenenc_string(data: &[u8]) -> Option<(Option<String>, usize)> {
    if data.first() == Some(&0xFB) {
        return Some((None, 1));
    }
    let (len, header) = parse_lenenc_int(data)?;
    let len = len as usize;
    if data.len() < header + len {
        return None;
    }
    let value = String::from_utf8_lossy(&data[header..header + len]).to_string();
    Some((Some(value), header + len))
}

/// Column name from a ColumnDefinition41 packet: the fifth of its
/// length-encoded strings (catalog, schema, table, org_table, name).
pub fn parse_column_name(payload: &[u8]) -> Option<String> {
    let mut data = payload;
    for _ in 0..4 {
        let (_, used) = parse_lenenc_string(data)?;
        data = &data[used..];
    }
    parse_lenenc_string(data)?.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet::command(command::COM_QUERY, b"SELECT 1");
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);

        let decoded = Packet::decode(&mut buf).unwrap();
        assert_eq!(decoded.sequence_id, 0);
        assert_eq!(&decoded.payload[..], b"\x03SELECT 1");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_returns_none() {
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x00, 0x00, 0x01][..]);
        assert!(Packet::decode(&mut buf).is_none());
        // Nothing consumed on a partial frame.
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_err_packet_parse() {
        // 0xFF | 1045 LE | '#28000' | message
        let mut payload = vec![0xFF, 0x15, 0x04];
        payload.extend_from_slice(b"#28000Access denied for user");
        let err = ErrPacket::parse(&payload).unwrap();
        assert_eq!(err.error_code, err_code::ER_ACCESS_DENIED_ERROR);
        assert_eq!(err.error_message, "Access denied for user");
    }

    #[test]
    fn test_response_classification() {
        assert!(is_ok_packet(&[0x00, 0x00, 0x00]));
        assert!(is_err_packet(&[0xFF, 0x15, 0x04]));
        assert!(is_eof_packet(&[0xFE, 0x00, 0x00, 0x02, 0x00]));
        assert!(!is_eof_packet(&[0xFE; 9]));
    }

    #[test]
    fn test_lenenc_values() {
        assert_eq!(parse_lenenc_int(&[0x05]), Some((5, 1)));
        assert_eq!(parse_lenenc_int(&[0xFC, 0x01, 0x02]), Some((0x0201, 3)));

        let (value, used) = parse_lenenc_string(b"\x03abcrest").unwrap();
        assert_eq!(value.as_deref(), Some("abc"));
        assert_eq!(used, 4);

        let (null, used) = parse_lenenc_string(&[0xFB]).unwrap();
        assert!(null.is_none());
        assert_eq!(used, 1);
    }

    #[test]
    fn test_parse_column_name() {
        let mut payload = Vec::new();
        for part in ["def", "mysql", "slave_status", "slave_status", "Master_Server_Id"] {
            payload.push(part.len() as u8);
            payload.extend_from_slice(part.as_bytes());
        }
        // Fixed-length tail of the definition is irrelevant to the name.
        payload.extend_from_slice(&[0x0C, 0x21, 0x00]);
        assert_eq!(
            parse_column_name(&payload).as_deref(),
            Some("Master_Server_Id")
        );

        assert!(parse_column_name(&[0x03]).is_none());
    }
}
