//! Domain name encoding and decoding, including compression pointers.

use std::io::{Cursor, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::FormatError;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;
/// Upper bound on compression pointers followed while decoding one name.
pub const MAX_POINTER_HOPS: usize = 16;

const POINTER_MASK: u8 = 0xc0;

/// Append `name` as a sequence of length-prefixed labels terminated by a zero byte.
/// A single trailing dot is ignored, an empty name (or ".") encodes the root.
pub fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<(), FormatError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    let start = out.len();
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            let bytes = label.as_bytes();
            if bytes.is_empty() {
                return Err(FormatError::EmptyLabel(name.to_owned()));
            }
            if bytes.len() > MAX_LABEL_LEN {
                return Err(FormatError::LabelTooLong(bytes.len()));
            }
            out.write_u8(bytes.len() as u8)?;
            out.write_all(bytes)?;
        }
    }
    out.write_u8(0)?;
    if out.len() - start > MAX_NAME_LEN {
        out.truncate(start);
        return Err(FormatError::NameTooLong);
    }
    Ok(())
}

pub fn name_to_bytes(name: &str) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(name.len() + 2);
    encode_name(name, &mut out)?;
    Ok(out)
}

/// Read a name at the cursor position.
///
/// `cursor` may run over the whole message or over a record payload; pointers
/// always resolve against `message`. When a pointer is met the cursor stops right
/// after its two bytes, the rest of the name is read from the pointer target.
pub fn decode_name<'a>(
    message: &'a [u8],
    cursor: &mut Cursor<&'a [u8]>,
) -> Result<String, FormatError> {
    let mut labels: Vec<String> = Vec::new();
    let mut encoded_len = 1;
    let mut hops = 0;
    let mut jumped: Option<Cursor<&'a [u8]>> = None;
    loop {
        let reader = match jumped.as_mut() {
            Some(c) => c,
            None => &mut *cursor,
        };
        let len = reader.read_u8()?;
        if len == 0 {
            break;
        }
        match len & POINTER_MASK {
            0 => {
                let mut label = vec![0; len as usize];
                reader.read_exact(&mut label)?;
                encoded_len += 1 + label.len();
                if encoded_len > MAX_NAME_LEN {
                    return Err(FormatError::NameTooLong);
                }
                labels.push(String::from_utf8(label)?);
            }
            POINTER_MASK => {
                let offset = (((len & !POINTER_MASK) as usize) << 8) | reader.read_u8()? as usize;
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(FormatError::PointerLoop(MAX_POINTER_HOPS));
                }
                if offset >= message.len() {
                    return Err(FormatError::PointerOutOfRange(offset));
                }
                let mut target = Cursor::new(message);
                target.set_position(offset as u64);
                jumped = Some(target);
            }
            _ => return Err(FormatError::LabelType(len)),
        }
    }
    let mut name = labels.join(".");
    if name.ends_with('.') {
        name.pop();
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_name() {
        let out = name_to_bytes("test.local").unwrap();
        assert_eq!(out, hex::decode("0474657374056c6f63616c00").unwrap());
        assert_eq!(name_to_bytes("test.local.").unwrap(), out);
    }

    #[test]
    fn encode_root_and_errors() {
        assert_eq!(name_to_bytes("").unwrap(), vec![0]);
        assert_eq!(name_to_bytes(".").unwrap(), vec![0]);
        assert!(matches!(
            name_to_bytes("a..b"),
            Err(FormatError::EmptyLabel(_))
        ));
        let long = "x".repeat(64);
        assert!(matches!(
            name_to_bytes(&long),
            Err(FormatError::LabelTooLong(64))
        ));
        let huge = vec!["abcdefgh"; 40].join(".");
        assert!(matches!(name_to_bytes(&huge), Err(FormatError::NameTooLong)));
    }

    #[test]
    fn decode_without_compression() {
        let bytes = name_to_bytes("My Service._http._tcp.local").unwrap();
        let mut cursor = Cursor::new(bytes.as_slice());
        let name = decode_name(&bytes, &mut cursor).unwrap();
        assert_eq!(name, "My Service._http._tcp.local");
        assert_eq!(cursor.position() as usize, bytes.len());
    }

    #[test]
    fn decode_follows_pointer() {
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(&name_to_bytes("_airplay._tcp.local").unwrap());
        let record_start = msg.len();
        msg.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x0c]);

        let mut cursor = Cursor::new(msg.as_slice());
        cursor.set_position(record_start as u64);
        let name = decode_name(&msg, &mut cursor).unwrap();
        assert_eq!(name, "_airplay._tcp.local");
        assert_eq!(cursor.position() as usize, record_start + 2);
    }

    #[test]
    fn decode_label_then_pointer() {
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(&name_to_bytes("_tcp.local").unwrap());
        let record_start = msg.len();
        msg.extend_from_slice(&[4, b'_', b'i', b'p', b'p', 0xc0, 0x0c]);

        let mut cursor = Cursor::new(msg.as_slice());
        cursor.set_position(record_start as u64);
        assert_eq!(decode_name(&msg, &mut cursor).unwrap(), "_ipp._tcp.local");
        assert_eq!(cursor.position() as usize, record_start + 7);
    }

    #[test]
    fn decode_pointer_inside_payload() {
        let mut msg = vec![0u8; 12];
        msg.extend_from_slice(&name_to_bytes("local").unwrap());
        let payload = [4, b'h', b'o', b's', b't', 0xc0, 0x0c];
        let mut cursor = Cursor::new(&payload[..]);
        assert_eq!(decode_name(&msg, &mut cursor).unwrap(), "host.local");
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let msg = [0xc0, 0x00];
        let mut cursor = Cursor::new(&msg[..]);
        assert!(matches!(
            decode_name(&msg, &mut cursor),
            Err(FormatError::PointerLoop(_))
        ));

        let msg = [0xc0, 0x02, 0xc0, 0x00];
        let mut cursor = Cursor::new(&msg[..]);
        assert!(matches!(
            decode_name(&msg, &mut cursor),
            Err(FormatError::PointerLoop(_))
        ));
    }

    #[test]
    fn bad_pointers_and_truncation() {
        let msg = [0xc0, 0x40];
        let mut cursor = Cursor::new(&msg[..]);
        assert!(matches!(
            decode_name(&msg, &mut cursor),
            Err(FormatError::PointerOutOfRange(0x40))
        ));

        let msg = [0x05, b'a', b'b'];
        let mut cursor = Cursor::new(&msg[..]);
        assert!(matches!(
            decode_name(&msg, &mut cursor),
            Err(FormatError::Truncated)
        ));

        let msg = [0x41, 0x00];
        let mut cursor = Cursor::new(&msg[..]);
        assert!(matches!(
            decode_name(&msg, &mut cursor),
            Err(FormatError::LabelType(0x41))
        ));
    }
}
