//! In-memory snapshot archives shaped like the ones the hosting service
//! serves: a pax global header, then a top-level directory and its contents.
//!
//! [`TarballBuilder::raw_file`] writes the entry name straight into the
//! header, bypassing the path checks of `tar::Builder`, so hostile archives
//! can be produced for extraction tests.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

/// Gzip-compress `bytes`.
pub fn gzip_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write to memory");
    encoder.finish().expect("gzip finish")
}

fn pax_record(key: &str, value: &str) -> String {
    // The length prefix counts itself, so grow it until it is stable.
    let body = format!(" {key}={value}\n");
    let mut len = body.len() + 1;
    while len.to_string().len() + body.len() != len {
        len = len.to_string().len() + body.len();
    }
    format!("{len}{body}")
}

pub struct TarballBuilder {
    builder: Builder<Vec<u8>>,
}

impl Default for TarballBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TarballBuilder {
    pub fn new() -> Self {
        Self {
            builder: Builder::new(Vec::new()),
        }
    }

    fn header(kind: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(1_700_000_000);
        header.set_uid(0);
        header.set_gid(0);
        header
    }

    /// `pax_global_header` entry carrying the commit id, as `git archive`
    /// writes it.
    #[must_use]
    pub fn pax_global_header(mut self, commit: &str) -> Self {
        let payload = pax_record("comment", commit);
        let mut header = Self::header(EntryType::XGlobalHeader, 0o666, payload.len() as u64);
        self.builder
            .append_data(&mut header, "pax_global_header", payload.as_bytes())
            .expect("append pax header");
        self
    }

    #[must_use]
    pub fn dir(mut self, path: &str, mode: u32) -> Self {
        let mut header = Self::header(EntryType::Directory, mode, 0);
        self.builder
            .append_data(&mut header, path, io::empty())
            .expect("append directory");
        self
    }

    #[must_use]
    pub fn file(mut self, path: &str, mode: u32, contents: &[u8]) -> Self {
        let mut header = Self::header(EntryType::Regular, mode, contents.len() as u64);
        self.builder
            .append_data(&mut header, path, contents)
            .expect("append file");
        self
    }

    #[must_use]
    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        let mut header = Self::header(EntryType::Symlink, 0o777, 0);
        header.set_link_name(target).expect("symlink target");
        self.builder
            .append_data(&mut header, path, io::empty())
            .expect("append symlink");
        self
    }

    /// Regular file whose name bytes are written verbatim (`..`, absolute
    /// paths and all).
    #[must_use]
    pub fn raw_file(mut self, raw_name: &[u8], mode: u32, contents: &[u8]) -> Self {
        assert!(raw_name.len() < 100, "raw names must fit the v7 name field");
        let mut header = Header::new_old();
        header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name);
        header.set_entry_type(EntryType::Regular);
        header.set_mode(mode);
        header.set_size(contents.len() as u64);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        self.builder
            .append(&header, contents)
            .expect("append raw file");
        self
    }

    /// Finished, uncompressed tar bytes.
    pub fn into_tar(self) -> Vec<u8> {
        self.builder.into_inner().expect("finish tar")
    }

    /// Finished `.tar.gz` bytes.
    pub fn into_gzip(self) -> Vec<u8> {
        gzip_bytes(&self.into_tar())
    }
}
