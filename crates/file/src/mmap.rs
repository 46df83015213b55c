//! Memory map file reader.

use std::{ffi::c_void, fs, io, ptr, slice};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use super::*;

/// File reader based on `mmap(2)`.
///
/// The whole file is mapped read-only and shared, in one go. Zero-length
/// files cannot be mapped; callers that may meet them should prefer the `fs`
/// reader.
pub struct Mmap {
    bytes: MmapBytes,
}

impl FileReader for Mmap {
    type Bytes = MmapBytes;

    fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = fs::File::open(path)?;

        let length = usize::try_from(file.metadata()?.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "The file is too large to map")
        })?;

        if length == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "An empty file cannot be mapped",
            ));
        }

        // SAFETY: `length` is non-zero, and the file descriptor outlives the
        // mapping inside `MmapBytes`.
        let pointer =
            unsafe { mmap(ptr::null_mut(), length, ProtFlags::READ, MapFlags::SHARED, &file, 0)? };

        Ok(Self { bytes: MmapBytes { _file: file, pointer, length } })
    }

    fn read_as_bytes(self) -> Result<Self::Bytes> {
        Ok(self.bytes)
    }
}

/// The mapped file content. The mapping is released on drop.
pub struct MmapBytes {
    _file: fs::File,
    pointer: *mut c_void,
    length: usize,
}

impl Deref for MmapBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the mapping covers `length` readable bytes for as long as
        // `self` lives.
        unsafe { slice::from_raw_parts(self.pointer as *const u8, self.length) }
    }
}

impl Drop for MmapBytes {
    fn drop(&mut self) {
        // `mmap(2)` only ever returns page-aligned addresses, which is
        // exactly what `munmap(2)` expects back.
        let unmapped = unsafe { munmap(self.pointer, self.length) };

        debug_assert!(unmapped.is_ok(), "munmap(2) failed: {unmapped:?}");
    }
}

// SAFETY: the mapping is immutable and its lifetime is tied to `_file`.
unsafe impl Send for MmapBytes {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmap() -> Result<()> {
        let file = Mmap::open("tests/hello.txt")?;
        let content = file.read_as_bytes()?;

        assert_eq!(*content, b"abcdef"[..]);

        Ok(())
    }

    #[test]
    fn test_mmap_rejects_empty_files() {
        let path = std::env::temp_dir().join(format!("casm-empty-{}", std::process::id()));
        std::fs::write(&path, []).unwrap();

        assert!(Mmap::open(&path).is_err());

        let _ = std::fs::remove_file(&path);
    }
}
