//! `casm_file` is a thin crate to manipulate files.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

use std::{io::Result, ops::Deref, path::Path};

#[cfg(all(not(feature = "fs"), not(feature = "mmap")))]
compile_error!("No file reader has been selected, please enable the `fs` or `mmap` feature");

#[cfg(feature = "mmap")]
pub mod mmap;

#[cfg(feature = "fs")]
pub mod fs;

/// Define what a file reader should look like.
pub trait FileReader: Sized {
    /// The reader outputs bytes that implement `Deref<[u8]>`.
    type Bytes: Deref<Target = [u8]>;

    /// Open a file.
    fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>;

    /// Read the entire file content.
    fn read_as_bytes(self) -> Result<Self::Bytes>;
}

/// File picker.
///
/// This type opens a file path based on the file reader selected by a Cargo
/// feature: `fs` (the default) or `mmap`. When both features are enabled,
/// `mmap` wins.
pub struct Picker;

impl Picker {
    /// Open a file by using [`mmap::Mmap`].
    #[cfg(feature = "mmap")]
    pub fn open<P>(path: P) -> Result<mmap::Mmap>
    where
        P: AsRef<Path>,
    {
        mmap::Mmap::open(path)
    }

    /// Open a file by using [`fs::File`].
    #[cfg(all(feature = "fs", not(feature = "mmap")))]
    pub fn open<P>(path: P) -> Result<fs::File>
    where
        P: AsRef<Path>,
    {
        fs::File::open(path)
    }
}
