//! The process-wide target registry.
//!
//! The registry is built exactly once, on first use, and is immutable
//! afterwards; every accessor guarantees "initialized before return".
//! Descriptor references are `'static` and stay valid for the process
//! lifetime.

use std::sync::OnceLock;

use target_lexicon::{Architecture, HOST};

use super::{aarch64, x86_64, Target};

static REGISTRY: OnceLock<Vec<Target>> = OnceLock::new();

/// All registered targets, in registration order.
pub fn all() -> &'static [Target] {
    REGISTRY.get_or_init(|| vec![x86_64::descriptor(), aarch64::descriptor()])
}

/// Look a target up by its exact, case-sensitive name.
pub fn get_by_name(name: &str) -> Option<&'static Target> {
    all().iter().find(|target| target.name() == name)
}

/// The registered target matching the host architecture, if any.
pub fn host() -> Option<&'static Target> {
    match HOST.architecture {
        Architecture::X86_64 => get_by_name("x86_64"),
        Architecture::Aarch64(_) => get_by_name("aarch64"),
        _ => None,
    }
}
