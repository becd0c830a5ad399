//! Persistent cart storage.
//!
//! Every cart gets [`STORAGE_SIZE`] bytes of disk. The bytes live in memory
//! in a [`Disk`] and every write is handed to a [`DiskManager`] as z85 text,
//! which keeps the stored form printable.

use std::{
    fmt, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, warn};

use super::{wasm4::STORAGE_SIZE, z85};

/// Common trait for accessing game disks.
pub trait DiskManager: Send {
    /// Retrieve the stored disk text, `None` when nothing was stored yet.
    fn load(&self) -> io::Result<Option<String>>;

    /// Replace the stored disk text.
    fn store(&self, encoded: &str) -> io::Result<()>;
}

/// The in-memory disk of a running cart.
pub struct Disk {
    buffer: [u8; STORAGE_SIZE],
    size: usize,
    manager: Box<dyn DiskManager>,
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk").field("size", &self.size).finish()
    }
}

impl Default for Disk {
    fn default() -> Self {
        Self::new(Box::new(MemoryDisk::default()))
    }
}

impl Disk {
    /// Create a disk, reading its initial content from `manager`.
    ///
    /// A manager that fails to load leaves the disk empty.
    pub fn new(manager: Box<dyn DiskManager>) -> Self {
        let mut buffer = [0u8; STORAGE_SIZE];
        let size = match manager.load() {
            Ok(Some(text)) => z85::decode(&text, &mut buffer),
            Ok(None) => 0,
            Err(err) => {
                warn!("error reading disk: {}", err);
                0
            }
        };
        debug!("disk loaded with {} bytes", size);

        Self {
            buffer,
            size,
            manager,
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The written part of the disk.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    /// Copy up to `dest.len()` written bytes into `dest`, returns the count.
    pub fn read(&self, dest: &mut [u8]) -> usize {
        let bytes_read = dest.len().min(self.size);
        dest[..bytes_read].copy_from_slice(&self.buffer[..bytes_read]);
        bytes_read
    }

    /// Replace the disk content with up to [`STORAGE_SIZE`] bytes of `src`
    /// and persist it, returns the count.
    ///
    /// The new content is visible to [`Disk::read`] even if persisting fails.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let bytes_written = src.len().min(STORAGE_SIZE);
        self.buffer[..bytes_written].copy_from_slice(&src[..bytes_written]);
        self.size = bytes_written;

        if let Err(err) = self.manager.store(&z85::encode(self.bytes())) {
            warn!("error writing disk: {}", err);
        }
        bytes_written
    }

    /// Replace the disk content without persisting it, as done when a
    /// state snapshot is restored.
    pub fn restore(&mut self, bytes: &[u8]) {
        let size = bytes.len().min(STORAGE_SIZE);
        self.buffer[..size].copy_from_slice(&bytes[..size]);
        self.buffer[size..].fill(0);
        self.size = size;
    }
}

fn read_text(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text.trim().to_string())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// A DiskManager which saves the disk at `/path/to/cart/{cart_name}.disk`.
#[derive(Debug, Clone)]
pub struct FileDisk(PathBuf);

impl FileDisk {
    pub fn new(cart_location: &Path) -> Self {
        Self(cart_location.with_extension("disk"))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl DiskManager for FileDisk {
    fn load(&self) -> io::Result<Option<String>> {
        read_text(&self.0)
    }

    fn store(&self, encoded: &str) -> io::Result<()> {
        fs::write(&self.0, encoded)
    }
}

/// A `DiskManager` which saves the game disk at `$DATA_DIR/netcart/{name}.disk`.
///
/// |Platform | Location                                                                                 |
/// | ------- | ---------------------------------------------------------------------------------------- |
/// | Linux   | `$XDG_DATA_HOME/netcart/{name}.disk` or `$HOME/.local/share/netcart/{name}.disk`         |
/// | macOS   | `$HOME/Library/Application Support/netcart/{name}.disk`                                  |
/// | Windows | `{FOLDERID_RoamingAppData}\netcart\{name}.disk`                                          |
#[derive(Debug, Clone)]
pub struct UserwideDisk(PathBuf);

impl UserwideDisk {
    pub fn new(name: &str) -> io::Result<Self> {
        let mut location = match dirs::data_dir() {
            Some(location) => location.join("netcart"),
            None => {
                return Err(io::Error::new(
                    ErrorKind::NotFound,
                    "no application data directory",
                ))
            }
        };

        fs::create_dir_all(&location)?;

        location.push(name);
        location.set_extension("disk");

        Ok(Self(location))
    }
}

impl DiskManager for UserwideDisk {
    fn load(&self) -> io::Result<Option<String>> {
        read_text(&self.0)
    }

    fn store(&self, encoded: &str) -> io::Result<()> {
        fs::write(&self.0, encoded)
    }
}

/// A `DiskManager` keeping the encoded disk in memory.
///
/// Clones share the same storage, so a clone kept by the caller observes
/// every write.
#[derive(Debug, Clone, Default)]
pub struct MemoryDisk(Arc<Mutex<Option<String>>>);

impl MemoryDisk {
    pub fn with_content(encoded: &str) -> Self {
        Self(Arc::new(Mutex::new(Some(encoded.to_string()))))
    }

    pub fn content(&self) -> Option<String> {
        match self.0.lock() {
            Ok(content) => content.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiskManager for MemoryDisk {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.content())
    }

    fn store(&self, encoded: &str) -> io::Result<()> {
        let mut content = match self.0.lock() {
            Ok(content) => content,
            Err(poisoned) => poisoned.into_inner(),
        };
        *content = Some(encoded.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenDisk;

    impl DiskManager for BrokenDisk {
        fn load(&self) -> io::Result<Option<String>> {
            Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
        }

        fn store(&self, _: &str) -> io::Result<()> {
            Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[test]
    fn read_is_clamped_to_written_size() {
        let mut disk = Disk::default();
        assert_eq!(0, disk.read(&mut [0; 16]));

        assert_eq!(3, disk.write(&[1, 2, 3]));
        let mut dest = [0xff; 8];
        assert_eq!(3, disk.read(&mut dest));
        assert_eq!([1, 2, 3, 0xff, 0xff, 0xff, 0xff, 0xff], dest);

        let mut dest = [0; 2];
        assert_eq!(2, disk.read(&mut dest));
        assert_eq!([1, 2], dest);
    }

    #[test]
    fn write_is_clamped_to_storage_size() {
        let mut disk = Disk::default();
        let src = vec![7u8; STORAGE_SIZE + 100];
        assert_eq!(STORAGE_SIZE, disk.write(&src));
        assert_eq!(STORAGE_SIZE, disk.len());
    }

    #[test]
    fn writes_are_persisted_as_z85() {
        let storage = MemoryDisk::default();
        let mut disk = Disk::new(Box::new(storage.clone()));
        disk.write(&[0x86, 0x4F, 0xD2, 0x6F, 0xB5, 0x59, 0xF7, 0x5B]);
        assert_eq!(Some("HelloWorld".to_string()), storage.content());

        // a new session sees the stored content
        let disk = Disk::new(Box::new(storage));
        assert_eq!(8, disk.len());
        assert_eq!(0x86, disk.bytes()[0]);
    }

    #[test]
    fn shorter_write_replaces_content() {
        let mut disk = Disk::default();
        disk.write(&[1, 2, 3, 4, 5, 6]);
        disk.write(&[9]);
        assert_eq!(&[9], disk.bytes());
    }

    #[test]
    fn persistence_failures_keep_the_session_going() {
        let mut disk = Disk::new(Box::new(BrokenDisk));
        assert!(disk.is_empty());
        assert_eq!(2, disk.write(&[4, 2]));
        let mut dest = [0; 2];
        assert_eq!(2, disk.read(&mut dest));
        assert_eq!([4, 2], dest);
    }

    #[test]
    fn restore_does_not_persist() {
        let storage = MemoryDisk::with_content("HelloWorld");
        let mut disk = Disk::new(Box::new(storage.clone()));
        disk.restore(&[1, 2]);
        assert_eq!(&[1, 2], disk.bytes());
        assert_eq!(Some("HelloWorld".to_string()), storage.content());
    }

    #[test]
    fn file_disk_next_to_cart() {
        let dir = std::env::temp_dir().join(format!("netcart-disk-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let manager = FileDisk::new(&dir.join("game.wasm"));
        assert_eq!(dir.join("game.disk"), manager.path());
        assert_eq!(None, manager.load().unwrap());

        manager.store("HelloWorld").unwrap();
        assert_eq!(Some("HelloWorld".to_string()), manager.load().unwrap());
        fs::remove_dir_all(&dir).unwrap();
    }
}
