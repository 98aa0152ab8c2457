//! Tools for reading an IMG archive.
//!
//! To start reading one, open an [`ImgArchive`] from its path.
//! The whole directory table is parsed up front;
//! member data is only touched when a given entry is [read].
//!
//! [`ImgArchive`]: struct.ImgArchive.html
//! [read]: struct.ImgArchive.html#method.read

use std::cmp::min;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;

use crate::result::*;
use crate::spec;

/// The text encoding of member names in the directory table.
///
/// The format itself doesn't say what the 24 name bytes are;
/// tooling in the wild mostly writes ASCII. Pick whichever matches
/// the archives you're dealing with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NameEncoding {
    /// Names are UTF-8 (the default)
    #[default]
    Utf8,
    /// Names are [code page 437](https://en.wikipedia.org/wiki/Code_page_437)
    Cp437,
}

/// Metadata for one member of the archive,
/// retrieved from its directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// The member's name: a `/`-separated relative path
    pub path: Utf8PathBuf,

    /// Size of the member's data in bytes.
    ///
    /// The directory stores whole sectors, not bytes, so this is the
    /// sector-rounded length, clamped to the end of the file.
    /// Readers see any zero padding up to the sector boundary;
    /// a trailing member the file ends flush with reads byte-exact.
    pub size: u64,

    /// Where the member's data starts, in bytes from the front of the archive
    pub(crate) byte_offset: u64,
}

/// An IMG archive to be read
pub struct ImgArchive {
    /// The underlying file, or `None` once the handle is closed
    file: Option<File>,
    /// Members in directory order
    entries: Vec<EntryMetadata>,
    /// Lowercased name -> index into `entries`.
    /// Names that differ only by case collide; the later record wins.
    by_name: HashMap<String, usize>,
}

impl ImgArchive {
    /// Opens the archive at the given path and parses its directory table.
    ///
    /// ```no_run
    /// # use rimg::read::*;
    /// let archive = ImgArchive::open("gta3.img", NameEncoding::default())?;
    /// for entry in archive.entries()? {
    ///     println!("{}: {} bytes", entry.path, entry.size);
    /// }
    /// # Ok::<(), rimg::result::ImgError>(())
    /// ```
    ///
    /// Fails if the path doesn't exist, if the magic isn't `VER2`,
    /// or if the directory table doesn't fit the file it describes.
    /// On failure the underlying file is released before returning.
    pub fn open<P: AsRef<Path>>(path: P, encoding: NameEncoding) -> ImgResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        if file_len < spec::HEADER_SIZE {
            return Err(ImgError::InvalidArchive("Too small for a header"));
        }
        let mut header_bytes = [0u8; spec::HEADER_SIZE as usize];
        (&file).read_exact(&mut header_bytes)?;
        let header = spec::Header::parse(&header_bytes)?;
        trace!("{:?}", header);

        let table_len = u64::from(header.entry_count) * spec::RECORD_SIZE;
        if spec::HEADER_SIZE + table_len > file_len {
            return Err(ImgError::InvalidArchive(
                "Directory table extends past the end of the file",
            ));
        }

        let mut table = vec![0u8; table_len as usize];
        (&file).read_exact(&mut table)?;
        let mut table = &table[..];

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut by_name = HashMap::with_capacity(header.entry_count as usize);

        for _ in 0..header.entry_count {
            let record = spec::DirectoryRecord::parse_and_consume(&mut table);
            trace!("{:?}", record);

            let byte_offset = record.byte_offset();
            if record.length_sectors > 0 && byte_offset >= file_len {
                return Err(ImgError::InvalidArchive(
                    "Member data starts past the end of the file",
                ));
            }
            // Zero-length members may legitimately point past the end
            // of an archive that stops short of their (empty) sectors.
            let size = min(record.byte_length(), file_len.saturating_sub(byte_offset));

            let name = spec::decode_name(&record.name, encoding)?;
            let metadata = EntryMetadata {
                path: Utf8PathBuf::from(name),
                size,
                byte_offset,
            };
            debug!("{:?}", metadata);

            by_name.insert(metadata.path.as_str().to_lowercase(), entries.len());
            entries.push(metadata);
        }

        Ok(Self {
            file: Some(file),
            entries,
            by_name,
        })
    }

    /// Opens the archive at the given path, assuming UTF-8 member names.
    pub fn open_read<P: AsRef<Path>>(path: P) -> ImgResult<Self> {
        Self::open(path, NameEncoding::Utf8)
    }

    /// Returns the members of the archive, in directory order.
    pub fn entries(&self) -> ImgResult<&[EntryMetadata]> {
        self.file()?;
        Ok(&self.entries)
    }

    /// Looks up a member by name, case-insensitively.
    pub fn lookup<P: AsRef<Utf8Path>>(&self, path: P) -> ImgResult<&EntryMetadata> {
        self.file()?;
        let path = path.as_ref();
        self.by_name
            .get(&path.as_str().to_lowercase())
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ImgError::NoSuchEntry(path.to_owned()))
    }

    /// Reads the given member from the archive.
    ///
    /// Each reader tracks its own position and seeks the shared file
    /// before every read, so several members can be open at once
    /// without stepping on each other.
    pub fn read(&self, metadata: &EntryMetadata) -> ImgResult<EntryReader<'_>> {
        debug!("Reading {:?}", metadata);
        Ok(EntryReader {
            file: self.file()?,
            pos: metadata.byte_offset,
            remaining: metadata.size,
        })
    }

    /// Releases the underlying file.
    ///
    /// Idempotent; every operation after the first call fails with
    /// [`ImgError::Closed`]. Dropping the archive releases the file too,
    /// this just does it at a time of your choosing.
    ///
    /// [`ImgError::Closed`]: ../result/enum.ImgError.html#variant.Closed
    pub fn close(&mut self) {
        self.file = None;
    }

    fn file(&self) -> ImgResult<&File> {
        self.file.as_ref().ok_or(ImgError::Closed)
    }
}

/// A lazy byte stream over one member's data.
///
/// Yields exactly [`EntryMetadata::size`] bytes, whole reserved
/// sectors or not.
///
/// [`EntryMetadata::size`]: struct.EntryMetadata.html#structfield.size
pub struct EntryReader<'a> {
    file: &'a File,
    pos: u64,
    remaining: u64,
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = min(buf.len() as u64, self.remaining) as usize;
        if limit == 0 {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(self.pos))?;
        let count = self.file.read(&mut buf[..limit])?;
        self.pos += count as u64;
        self.remaining -= count as u64;
        Ok(count)
    }
}

/// Extracts every member of the archive at `archive_path` into `dest_dir`,
/// creating the destination (and any parent directories inside it) as needed.
///
/// Members come out in directory order; the first failure aborts the
/// whole extraction, leaving whatever was already written.
pub fn extract_to_directory<P, Q>(
    archive_path: P,
    dest_dir: Q,
    encoding: NameEncoding,
) -> ImgResult<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let archive = ImgArchive::open(archive_path, encoding)?;
    let dest_dir = dest_dir.as_ref();
    fs::create_dir_all(dest_dir)?;

    for entry in archive.entries()? {
        check_escapes(&entry.path)?;
        let target = dest_dir.join(entry.path.as_std_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        info!("Extracting {}", entry.path);
        let mut reader = archive.read(entry)?;
        let mut sink = File::create(&target)?;
        io::copy(&mut reader, &mut sink)?;
    }
    Ok(())
}

/// Refuses member paths that would land outside the destination directory.
fn check_escapes(path: &Utf8Path) -> ImgResult<()> {
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir | Utf8Component::ParentDir => {
                warn!("Refusing to extract {}", path);
                return Err(ImgError::InvalidArchive(
                    "Member path escapes the destination directory",
                ));
            }
            Utf8Component::CurDir | Utf8Component::Normal(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_checks() {
        check_escapes(Utf8Path::new("models/car.dff")).unwrap();
        check_escapes(Utf8Path::new("./car.dff")).unwrap();
        assert!(check_escapes(Utf8Path::new("../car.dff")).is_err());
        assert!(check_escapes(Utf8Path::new("/etc/passwd")).is_err());
        assert!(check_escapes(Utf8Path::new("models/../../car.dff")).is_err());
    }
}
