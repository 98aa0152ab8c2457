//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ImgResult<T> = Result<T, ImgError>;

#[derive(Debug, Error)]
pub enum ImgError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The IMG archive contained invalid data per the VER2 layout.
    #[error("Invalid IMG archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 member name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A member name contains characters the chosen encoding can't represent.
    #[error("Member name {0} can't be represented in the chosen encoding")]
    NameNotEncodable(String),

    /// A member name encodes to more than the 24 bytes the name field holds.
    #[error("Member name {name} encodes to {len} bytes; the name field holds 24")]
    NameTooLong {
        /// The offending member name
        name: String,
        /// Its encoded length in bytes
        len: usize,
    },

    /// A directory record held a name field starting with a null byte.
    /// An archive with a nameless member is invalid.
    #[error("Directory record holds an empty member name")]
    EmptyName,

    /// No member was found with the given name.
    /// (Names compare case-insensitively.)
    #[error("No member in the archive with the name {0}")]
    NoSuchEntry(Utf8PathBuf),

    /// The archive handle was closed before this operation.
    #[error("Archive handle is closed")]
    Closed,

    /// A member's byte source produced a different number of bytes
    /// than the length it was queued with.
    #[error("Member {name} supplied {actual} bytes, expected {expected}")]
    MemberSizeMismatch {
        /// The member being written
        name: String,
        /// The length the member was queued with
        expected: u64,
        /// The bytes its source actually produced
        actual: u64,
    },

    /// A member is too large for the 16-bit sector count in its
    /// directory record (65535 sectors, a hair under 128 MB).
    #[error("Member {name} is {size} bytes, too large for a 16-bit sector count")]
    MemberTooLarge {
        /// The member being written
        name: String,
        /// Its length in bytes
        size: u64,
    },

    /// More members than the 16-bit header count can describe.
    #[error("Archive would hold {0} members; the header count is 16 bits")]
    TooManyMembers(usize),
}
