//! Tools for writing an IMG archive.
//!
//! [`ImgWriter`] queues members, then lays the whole archive out in one
//! pass when you call [`finish()`]: header, directory table, and each
//! member's data zero-padded out to its sector boundary.
//! Sector offsets depend on the final member count,
//! so nothing but a placeholder header hits the file until then.
//!
//! [`ImgWriter`]: struct.ImgWriter.html
//! [`finish()`]: struct.ImgWriter.html#method.finish

use std::cmp::min;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use camino::Utf8Path;
use log::*;
use walkdir::WalkDir;

use crate::read::NameEncoding;
use crate::result::*;
use crate::spec;

/// A member queued for writing: its encoded name, its declared size,
/// and the byte source to drain once the layout is known.
struct PendingMember<'a> {
    name: String,
    name_field: [u8; spec::NAME_FIELD_SIZE],
    size: u64,
    sectors: u16,
    source: Box<dyn Read + 'a>,
}

/// An IMG archive being written
pub struct ImgWriter<'a, W: Write + Seek> {
    inner: W,
    members: Vec<PendingMember<'a>>,
    encoding: NameEncoding,
}

impl ImgWriter<'_, BufWriter<File>> {
    /// Creates (or truncates) an archive file at the given path.
    ///
    /// The file immediately gets a placeholder header with a zero
    /// entry count; [`finish()`] writes the real one.
    ///
    /// [`finish()`]: #method.finish
    pub fn create<P: AsRef<Path>>(path: P, encoding: NameEncoding) -> ImgResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), encoding)
    }
}

impl<'a, W: Write + Seek> ImgWriter<'a, W> {
    /// Starts an archive on any seekable sink and writes the
    /// placeholder header.
    pub fn new(mut inner: W, encoding: NameEncoding) -> ImgResult<Self> {
        inner.write_all(&spec::Header::to_bytes(0))?;
        Ok(Self {
            inner,
            members: Vec::new(),
            encoding,
        })
    }

    /// Queues a member.
    ///
    /// The name is validated here, before any member data is written,
    /// so an over-long name fails the build while the file still holds
    /// nothing but the placeholder header. `source` is kept open until
    /// [`finish()`] drains it, and must produce at least `size` bytes;
    /// anything past `size` is ignored.
    ///
    /// [`finish()`]: #method.finish
    pub fn add<R: Read + 'a>(&mut self, name: &str, size: u64, source: R) -> ImgResult<()> {
        let name_field = spec::encode_name(name, self.encoding)?;
        let sectors =
            u16::try_from(spec::sectors_for(size)).map_err(|_| ImgError::MemberTooLarge {
                name: name.to_owned(),
                size,
            })?;

        debug!("Queued {} ({} bytes, {} sectors)", name, size, sectors);
        self.members.push(PendingMember {
            name: name.to_owned(),
            name_field,
            size,
            sectors,
            source: Box::new(source),
        });
        Ok(())
    }

    /// Lays out and writes the whole archive, returning the underlying sink.
    ///
    /// A failure partway through leaves the sink in an indeterminate
    /// state; discard it.
    pub fn finish(mut self) -> ImgResult<W> {
        let count = u16::try_from(self.members.len())
            .map_err(|_| ImgError::TooManyMembers(self.members.len()))?;

        info!("Writing archive: {} members", count);

        // Members pack back to back from the first sector past the
        // directory table, in the order they were queued.
        let mut next_sector = spec::first_data_sector(u32::from(count));
        let mut starting_sectors = Vec::with_capacity(self.members.len());

        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&spec::Header::to_bytes(count))?;

        for member in &self.members {
            let record = spec::DirectoryRecord {
                // Fits: 16-bit count times 16-bit sector lengths
                // can't push an offset past u32.
                offset_sectors: next_sector as u32,
                length_sectors: member.sectors,
                name: member.name_field,
            };
            trace!("{:?}", record);
            self.inner.write_all(&record.to_bytes())?;
            starting_sectors.push(next_sector);
            next_sector += u64::from(member.sectors);
        }

        let mut pos = spec::HEADER_SIZE + self.members.len() as u64 * spec::RECORD_SIZE;
        for (member, &starting_sector) in self.members.iter_mut().zip(&starting_sectors) {
            let target = starting_sector * spec::SECTOR_SIZE;
            write_zeros(&mut self.inner, target - pos)?;

            let copied = io::copy(
                &mut (&mut member.source).take(member.size),
                &mut self.inner,
            )?;
            if copied != member.size {
                return Err(ImgError::MemberSizeMismatch {
                    name: member.name.clone(),
                    expected: member.size,
                    actual: copied,
                });
            }
            pos = target + copied;
        }

        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Pads the sink with the given number of zero bytes.
fn write_zeros<W: Write>(to: &mut W, mut count: u64) -> ImgResult<()> {
    const ZEROS: [u8; spec::SECTOR_SIZE as usize] = [0; spec::SECTOR_SIZE as usize];
    while count > 0 {
        let chunk = min(count, ZEROS.len() as u64) as usize;
        to.write_all(&ZEROS[..chunk])?;
        count -= chunk as u64;
    }
    Ok(())
}

/// Packs every file under `src_dir` into a new archive at `dest_archive`.
///
/// Member names are the files' relative paths below `src_dir`,
/// `/`-separated; with `include_base_dir`, the directory's own name is
/// kept as a leading component. Files are taken in sorted path order.
///
/// Every name is validated before the destination file is even created,
/// so a single over-long name fails the whole build without leaving an
/// unusable archive behind.
pub fn create_from_directory<P, Q>(
    src_dir: P,
    dest_archive: Q,
    include_base_dir: bool,
    encoding: NameEncoding,
) -> ImgResult<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let src_dir = src_dir.as_ref();
    let prefix = if include_base_dir {
        src_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    } else {
        None
    };

    let mut members = Vec::new();
    for dent in WalkDir::new(src_dir).sort_by_file_name() {
        let dent = dent.map_err(io::Error::from)?;
        if !dent.file_type().is_file() {
            continue;
        }
        let rel = dent
            .path()
            .strip_prefix(src_dir)
            .expect("walked outside the source directory");
        let rel = Utf8Path::from_path(rel).ok_or_else(|| {
            ImgError::NameNotEncodable(rel.to_string_lossy().into_owned())
        })?;

        // Member names use forward slashes no matter the host.
        let mut name = rel
            .components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(prefix) = &prefix {
            name = format!("{}/{}", prefix, name);
        }

        let size = dent.metadata().map_err(io::Error::from)?.len();
        members.push((name, dent.into_path(), size));
    }

    // The name check is an archive-wide precondition:
    // fail before touching the destination.
    for (name, _, _) in &members {
        spec::encode_name(name, encoding)?;
    }

    info!(
        "Packing {} files from {} into {}",
        members.len(),
        src_dir.display(),
        dest_archive.as_ref().display()
    );

    let mut writer = ImgWriter::create(&dest_archive, encoding)?;
    for (name, path, size) in &members {
        writer.add(name, *size, File::open(path)?)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::spec::{HEADER_SIZE, SECTOR_SIZE};

    #[test]
    fn empty_archive_is_a_bare_header() {
        let writer = ImgWriter::new(Cursor::new(Vec::new()), NameEncoding::Utf8).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len() as u64, HEADER_SIZE);
        assert_eq!(&bytes[..4], b"VER2");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn single_member_layout() {
        let mut writer = ImgWriter::new(Cursor::new(Vec::new()), NameEncoding::Utf8).unwrap();
        writer.add("hi.txt", 5, &b"hello"[..]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        // Count is one...
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        // ...the sole record starts its data in sector 1...
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..14], &[1, 0]);
        // ...and the data sits right at the sector boundary,
        // with zero padding up to it.
        assert_eq!(bytes.len() as u64, SECTOR_SIZE + 5);
        assert!(bytes[40..SECTOR_SIZE as usize].iter().all(|&b| b == 0));
        assert_eq!(&bytes[SECTOR_SIZE as usize..], b"hello");
    }

    #[test]
    fn members_pack_back_to_back() {
        let big = vec![0xABu8; 2049]; // two sectors
        let mut writer = ImgWriter::new(Cursor::new(Vec::new()), NameEncoding::Utf8).unwrap();
        writer.add("a.bin", 2049, &big[..]).unwrap();
        writer.add("b.bin", 1, &b"x"[..]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        // a: sector 1, two sectors long. b: sector 3.
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..14], &[2, 0]);
        assert_eq!(&bytes[40..44], &[3, 0, 0, 0]);
        assert_eq!(&bytes[44..46], &[1, 0]);
        assert_eq!(bytes[3 * SECTOR_SIZE as usize], b'x');
        // a's slack sector is zero-padded.
        assert!(bytes[SECTOR_SIZE as usize + 2049..3 * SECTOR_SIZE as usize]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn short_source_fails_the_build() {
        let mut writer = ImgWriter::new(Cursor::new(Vec::new()), NameEncoding::Utf8).unwrap();
        writer.add("short.bin", 10, &b"abc"[..]).unwrap();
        match writer.finish() {
            Err(ImgError::MemberSizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 10);
                assert_eq!(actual, 3);
            }
            other => panic!("Expected MemberSizeMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn long_name_fails_before_any_data() {
        let mut writer = ImgWriter::new(Cursor::new(Vec::new()), NameEncoding::Utf8).unwrap();
        let err = writer
            .add("a/very/long/path/that/wont/fit.txt", 1, &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, ImgError::NameTooLong { .. }));
    }
}
