//! Code specific to the IMG (VER2) file layout.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//!
//! A VER2 archive is three back-to-back regions:
//!
//! ```text
//! magic + entry count             8 bytes
//! directory record 1              32 bytes
//! .
//! .
//! directory record n              32 bytes
//! member data                     2048-byte sectors, zero-padded
//! ```
//!
//! Every offset and length in the directory is counted in 2048-byte
//! sectors, never bytes.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html

use std::borrow::Cow;
use std::convert::TryInto;

use codepage_437::*;

use crate::read::NameEncoding;
use crate::result::*;

/// Magic tag opening every version 2 archive
pub const MAGIC: [u8; 4] = *b"VER2";

/// The quantization unit for all offsets and lengths in the directory
pub const SECTOR_SIZE: u64 = 2048;

/// Size of the archive header: the magic plus a 32-bit entry count
pub const HEADER_SIZE: u64 = 8;

/// Size of one directory record
pub const RECORD_SIZE: u64 = 32;

/// Width of the name field in a directory record
pub const NAME_FIELD_SIZE: usize = 24;

// Straight from the Rust docs:

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Number of sectors needed to hold `byte_length` bytes
pub fn sectors_for(byte_length: u64) -> u64 {
    byte_length.div_ceil(SECTOR_SIZE)
}

/// The first sector free for member data:
/// the header plus the directory table, rounded up to a whole sector.
pub fn first_data_sector(entry_count: u32) -> u64 {
    (HEADER_SIZE + u64::from(entry_count) * RECORD_SIZE).div_ceil(SECTOR_SIZE)
}

/// Data from the archive header
///
/// Sits at the very front of the file and tells us how many
/// directory records follow it.
#[derive(Debug)]
pub struct Header {
    pub entry_count: u32,
}

impl Header {
    pub fn parse(mut header: &[u8]) -> ImgResult<Self> {
        // magic                           4 bytes  ("VER2")
        // entry count                     2 bytes
        // reserved                        2 bytes
        //
        // The count is written as 16 bits but read as all four,
        // reserved bytes included.
        if header[..4] != MAGIC {
            return Err(ImgError::InvalidArchive("Bad magic, expected \"VER2\""));
        }
        header = &header[4..];
        let entry_count = read_u32(&mut header);

        Ok(Self { entry_count })
    }

    pub fn to_bytes(entry_count: u16) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[..4].copy_from_slice(&MAGIC);
        bytes[4..6].copy_from_slice(&entry_count.to_le_bytes());
        // Bytes 6 and 7 are reserved, left zero.
        bytes
    }
}

/// Data from one directory record
///
/// Each of these places one member within the archive:
/// where its sectors start, how many it holds, and what it's called.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    /// Where the member's data starts, in sectors from the front of the file
    pub offset_sectors: u32,
    /// How many whole sectors are reserved for the member
    pub length_sectors: u16,
    /// The raw name field, null-terminated unless the name fills all 24 bytes
    pub name: [u8; NAME_FIELD_SIZE],
}

impl DirectoryRecord {
    pub fn parse_and_consume(record: &mut &[u8]) -> Self {
        // offset                          4 bytes  (in sectors)
        // length                          2 bytes  (in sectors)
        // reserved                        2 bytes
        // name                            24 bytes
        let offset_sectors = read_u32(record);
        let length_sectors = read_u16(record);
        let _reserved = read_u16(record);
        let (name_bytes, rest) = record.split_at(NAME_FIELD_SIZE);
        *record = rest;
        let mut name = [0u8; NAME_FIELD_SIZE];
        name.copy_from_slice(name_bytes);

        Self {
            offset_sectors,
            length_sectors,
            name,
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE as usize] {
        let mut bytes = [0u8; RECORD_SIZE as usize];
        bytes[..4].copy_from_slice(&self.offset_sectors.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.length_sectors.to_le_bytes());
        // Bytes 6 and 7 are reserved, left zero.
        bytes[8..].copy_from_slice(&self.name);
        bytes
    }

    /// Absolute byte offset of the member's first sector
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset_sectors) * SECTOR_SIZE
    }

    /// Byte length of the member's reserved sectors
    pub fn byte_length(&self) -> u64 {
        u64::from(self.length_sectors) * SECTOR_SIZE
    }
}

/// Encodes a member name into the fixed 24-byte name field,
/// null-padded if it falls short.
pub fn encode_name(name: &str, encoding: NameEncoding) -> ImgResult<[u8; NAME_FIELD_SIZE]> {
    let encoded: Cow<[u8]> = match encoding {
        NameEncoding::Utf8 => Cow::Borrowed(name.as_bytes()),
        NameEncoding::Cp437 => name
            .to_cp437(&CP437_CONTROL)
            .map_err(|_| ImgError::NameNotEncodable(name.to_owned()))?,
    };

    if encoded.len() > NAME_FIELD_SIZE {
        return Err(ImgError::NameTooLong {
            name: name.to_owned(),
            len: encoded.len(),
        });
    }

    let mut field = [0u8; NAME_FIELD_SIZE];
    field[..encoded.len()].copy_from_slice(&encoded);
    Ok(field)
}

/// Decodes a member name from the fixed name field:
/// everything up to the first null byte, or all 24 bytes if there is none.
pub fn decode_name(field: &[u8; NAME_FIELD_SIZE], encoding: NameEncoding) -> ImgResult<String> {
    let len = memchr::memchr(0, field).unwrap_or(NAME_FIELD_SIZE);
    if len == 0 {
        return Err(ImgError::EmptyName);
    }
    let name_bytes = &field[..len];

    match encoding {
        NameEncoding::Utf8 => Ok(std::str::from_utf8(name_bytes)?.to_owned()),
        NameEncoding::Cp437 => {
            let cow: Cow<str> = Cow::borrow_from_cp437(name_bytes, &CP437_CONTROL);
            Ok(cow.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_quantization() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(2047), 1);
        assert_eq!(sectors_for(2048), 1);
        assert_eq!(sectors_for(2049), 2);
    }

    #[test]
    fn data_starts_past_the_directory() {
        // 8 header bytes always round up to a full sector.
        assert_eq!(first_data_sector(0), 1);
        assert_eq!(first_data_sector(1), 1);
        // 63 records fit the first sector alongside the header; 64 don't.
        assert_eq!(first_data_sector(63), 1);
        assert_eq!(first_data_sector(64), 2);
    }

    #[test]
    fn header_round_trip() {
        let bytes = Header::to_bytes(1234);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.entry_count, 1234);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header::to_bytes(0);
        bytes[0] = b'X';
        assert!(matches!(
            Header::parse(&bytes),
            Err(ImgError::InvalidArchive(_))
        ));
    }

    #[test]
    fn record_round_trip() {
        let record = DirectoryRecord {
            offset_sectors: 5,
            length_sectors: 3,
            name: encode_name("models/car.dff", NameEncoding::Utf8).unwrap(),
        };
        let bytes = record.to_bytes();
        let mut slice = &bytes[..];
        let parsed = DirectoryRecord::parse_and_consume(&mut slice);
        assert!(slice.is_empty());
        assert_eq!(parsed.offset_sectors, 5);
        assert_eq!(parsed.length_sectors, 3);
        assert_eq!(
            decode_name(&parsed.name, NameEncoding::Utf8).unwrap(),
            "models/car.dff"
        );
        assert_eq!(parsed.byte_offset(), 5 * 2048);
        assert_eq!(parsed.byte_length(), 3 * 2048);
    }

    #[test]
    fn name_length_boundary() {
        let exactly_24 = "123456789012345678901234";
        assert_eq!(exactly_24.len(), 24);
        let field = encode_name(exactly_24, NameEncoding::Utf8).unwrap();
        // No terminator when the name fills the field.
        assert!(field.iter().all(|&b| b != 0));
        assert_eq!(
            decode_name(&field, NameEncoding::Utf8).unwrap(),
            exactly_24
        );

        let too_long = "1234567890123456789012345";
        match encode_name(too_long, NameEncoding::Utf8) {
            Err(ImgError::NameTooLong { len, .. }) => assert_eq!(len, 25),
            other => panic!("Expected NameTooLong, got {:?}", other),
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let field = [0u8; NAME_FIELD_SIZE];
        assert!(matches!(
            decode_name(&field, NameEncoding::Utf8),
            Err(ImgError::EmptyName)
        ));
    }

    #[test]
    fn cp437_names() {
        let field = encode_name("grüß.txt", NameEncoding::Cp437).unwrap();
        assert_eq!(
            decode_name(&field, NameEncoding::Cp437).unwrap(),
            "grüß.txt"
        );

        // Not every scalar has a CP437 code point.
        assert!(matches!(
            encode_name("日本語.txt", NameEncoding::Cp437),
            Err(ImgError::NameNotEncodable(_))
        ));
    }

    #[test]
    fn multibyte_names_count_bytes_not_chars() {
        // 13 chars, 26 UTF-8 bytes.
        let umlauts = "ööööööööööööö";
        assert!(matches!(
            encode_name(umlauts, NameEncoding::Utf8),
            Err(ImgError::NameTooLong { len: 26, .. })
        ));
        // The same name fits CP437, one byte per char.
        encode_name(umlauts, NameEncoding::Cp437).unwrap();
    }
}
