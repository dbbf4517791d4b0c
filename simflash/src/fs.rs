//! Simulated image stores.
//!
//! [`MemFs`] holds files in memory and can be told to misbehave.  [`HostFs`]
//! serves a host directory, usually a scratch one from [`HostFs::staging`].

use std::{
    cell::Cell,
    collections::BTreeMap,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    rc::Rc,
};

use storage::{Error, ReadOnlyFs, Result, RoFile};
use temp_dir::TempDir;

#[derive(Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    mounted: bool,
    open: Rc<Cell<usize>>,
    /// Refuse to mount.
    pub fail_mount: bool,
    /// Report this size for every opened file, whatever it holds.
    pub size_override: Option<usize>,
    /// Most bytes handed out by a single read.  0 means no limit.
    pub max_read: usize,
}

impl MemFs {
    pub fn new() -> Self {
        MemFs::default()
    }

    pub fn add(&mut self, path: &str, data: Vec<u8>) -> &mut Self {
        self.files.insert(path.to_string(), data);
        self
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Files opened and not yet closed.  Dropping a file does not count as
    /// closing it.
    pub fn open_files(&self) -> usize {
        self.open.get()
    }
}

impl ReadOnlyFs for MemFs {
    type File = MemFile;

    fn mount(&mut self) -> Result<()> {
        if self.fail_mount {
            return Err(Error::Io);
        }
        self.mounted = true;
        Ok(())
    }

    fn open(&mut self, path: &str) -> Result<MemFile> {
        if !self.mounted {
            return Err(Error::Io);
        }
        let data = self.files.get(path).ok_or(Error::NotFound)?.clone();
        self.open.set(self.open.get() + 1);
        Ok(MemFile {
            size: self.size_override.unwrap_or(data.len()),
            data,
            pos: 0,
            max_read: self.max_read,
            open: self.open.clone(),
        })
    }
}

pub struct MemFile {
    data: Vec<u8>,
    size: usize,
    pos: usize,
    max_read: usize,
    open: Rc<Cell<usize>>,
}

impl RoFile for MemFile {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let left = self.data.len().saturating_sub(self.pos);
        let mut count = buf.len().min(left);
        if self.max_read > 0 {
            count = count.min(self.max_read);
        }
        buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        self.pos = pos;
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.open.set(self.open.get() - 1);
        Ok(())
    }
}

/// A host directory standing in for the external filesystem.  Paths are
/// taken relative to the root, with any leading `/` dropped.
pub struct HostFs {
    root: PathBuf,
    mounted: bool,
    _scratch: Option<TempDir>,
}

impl HostFs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        HostFs {
            root: root.as_ref().to_path_buf(),
            mounted: false,
            _scratch: None,
        }
    }

    /// An empty scratch directory, removed when this is dropped.
    pub fn staging() -> anyhow::Result<Self> {
        let scratch = TempDir::new()?;
        Ok(HostFs {
            root: scratch.path().to_path_buf(),
            mounted: false,
            _scratch: Some(scratch),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a file into the store.
    pub fn stage(&self, path: &str, data: &[u8]) -> anyhow::Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, data)?;
        Ok(())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn io_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound,
        _ => Error::Io,
    }
}

impl ReadOnlyFs for HostFs {
    type File = HostFile;

    fn mount(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::Io);
        }
        self.mounted = true;
        Ok(())
    }

    fn open(&mut self, path: &str) -> Result<HostFile> {
        if !self.mounted {
            return Err(Error::Io);
        }
        let file = File::open(self.resolve(path)).map_err(io_error)?;
        let size = file.metadata().map_err(io_error)?.len() as usize;
        Ok(HostFile { file, size })
    }
}

pub struct HostFile {
    file: File,
    size: usize,
}

impl RoFile for HostFile {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf).map_err(io_error)
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos as u64))
            .map(|_| ())
            .map_err(io_error)
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfs_needs_mount() {
        let mut fs = MemFs::new();
        fs.add("/firmware.bin", vec![1, 2, 3]);
        assert!(fs.open("/firmware.bin").is_err());
        fs.mount().unwrap();
        let mut file = fs.open("/firmware.bin").unwrap();
        assert_eq!(file.size(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
        assert_eq!(fs.open("/other.bin").err(), Some(Error::NotFound));
        assert_eq!(fs.open_files(), 1);
        file.close().unwrap();
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn memfs_short_reads() {
        let mut fs = MemFs::new();
        fs.max_read = 5;
        fs.add("/a", (0..20).collect());
        fs.mount().unwrap();
        let mut file = fs.open("/a").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        file.seek(18).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[18, 19]);
    }

    #[test]
    fn hostfs_stages_files() -> anyhow::Result<()> {
        let mut fs = HostFs::staging()?;
        fs.stage("/images/firmware.bin", b"hello")?;
        fs.mount().unwrap();
        let mut file = fs.open("/images/firmware.bin").unwrap();
        assert_eq!(file.size(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.open("/missing").err(), Some(Error::NotFound));
        Ok(())
    }
}
