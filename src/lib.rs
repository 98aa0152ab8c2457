//! rimg reads and writes IMG (VER2) archives,
//! the sector-aligned containers the 3D universe-era Grand Theft Auto
//! games keep their models and textures in.
//!
//! Reading gives you random access to individual members without
//! touching the rest of the file:
//!
//! ```no_run
//! # use std::io::Read;
//! # use rimg::*;
//! let archive = ImgArchive::open_read("gta3.img")?;
//!
//! // Walk the whole directory...
//! for entry in archive.entries()? {
//!     println!("{}: {} bytes", entry.path, entry.size);
//! }
//!
//! // ...or go straight to one member. Lookups are case-insensitive.
//! let entry = archive.lookup("models/Airport.DFF")?;
//! let mut reader = archive.read(entry)?;
//! let mut contents = Vec::new();
//! reader.read_to_end(&mut contents)?;
//! # Ok::<(), rimg::result::ImgError>(())
//! ```
//!
//! Writing packs a queue of members into a fresh archive in one pass:
//!
//! ```no_run
//! # use std::fs::File;
//! # use rimg::*;
//! let mut writer = ImgWriter::create("out.img", NameEncoding::default())?;
//! let source = File::open("car.dff")?;
//! let len = source.metadata()?.len();
//! writer.add("models/car.dff", len, source)?;
//! writer.finish()?;
//! # Ok::<(), rimg::result::ImgError>(())
//! ```
//!
//! Or skip the plumbing and mirror a directory tree in and out:
//!
//! ```no_run
//! # use rimg::*;
//! create_from_directory("assets/", "assets.img", false, NameEncoding::default())?;
//! extract_to_directory("assets.img", "unpacked/", NameEncoding::default())?;
//! # Ok::<(), rimg::result::ImgError>(())
//! ```
//!
//! A few format facts worth knowing up front:
//!
//! - Everything in the directory table is counted in 2048-byte sectors.
//!   Member sizes on read are therefore sector-rounded; the original
//!   byte length isn't stored anywhere.
//! - Member names live in a fixed 24-byte field. Longer names fail the
//!   whole build before anything is written.
//! - The container has no compression, no nesting, and no in-place
//!   updates. You build a whole archive or you read one.

pub mod read;
pub mod result;
pub mod write;

pub use read::{extract_to_directory, EntryMetadata, ImgArchive, NameEncoding};
pub use result::{ImgError, ImgResult};
pub use write::{create_from_directory, ImgWriter};

mod spec;
