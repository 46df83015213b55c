//! `casm-assembler` turns validated COIL modules into native code for a
//! selected target architecture.
//!
//! The [`Assembler`] façade owns a diagnostics sink, an optimization level,
//! an output format and a target context; [`Assembler::process_module`]
//! drives the fixed pipeline — validate, parse the function and global
//! payloads, optimize, decode and lower the code, parse relocations, emit —
//! and [`Assembler::write_output`] persists the result.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod assembler;
mod buffer;
mod configuration;
pub mod diagnostics;
mod optimizer;
pub mod target;

pub use assembler::*;
pub use buffer::OutputBuffer;
pub use configuration::{Error as ConfigurationError, TargetConfiguration};
pub use optimizer::{OptimizationLevel, Pass};
pub use target::{registry, DeviceClass, OutputFormat, Target, TargetContext, TargetError};
