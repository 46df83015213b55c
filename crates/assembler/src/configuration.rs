//! Target tuning loaded from a `key = value` file.

use std::{collections::BTreeMap, fs, io, path::Path};

use casm_errors::error;
use log::debug;

error! {
    #[doc = "Configuration loading errors."]
    pub enum Error {
        #[code = E005]
        #[message = "The configuration file could not be read."]
        #[formatted_message("I was not able to read the `{0}` configuration file: {1}.")]
        #[help = "Check that the file exists and is readable."]
        Read(String, io::Error),

        #[code = E005]
        #[message = "A configuration line is not a `key = value` entry."]
        #[formatted_message("line {1} of `{0}` is not a `key = value` entry.")]
        #[help = "Each non-comment line must contain a `=`. Comments start with `#`."]
        Malformed(String, usize),

        #[code = E005]
        #[message = "A configuration entry has an empty key."]
        #[formatted_message("line {1} of `{0}` has an empty key.")]
        #[help = "Write the entry as `key = value`, with a non-empty key."]
        EmptyKey(String, usize),
    }
}

/// An opaque bag of `key = value` entries, applied to a target context once,
/// at target-configuration time. The assembler core reads no keys; which keys
/// mean something is the business of each back-end.
#[derive(Debug, Default)]
pub struct TargetConfiguration {
    entries: BTreeMap<String, String>,
}

impl TargetConfiguration {
    /// Load a configuration file.
    ///
    /// One `key = value` entry per line; blank lines and lines starting with
    /// `#` are ignored; a duplicated key keeps the last value.
    pub fn from_file<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let origin = path.as_ref().display().to_string();
        let content =
            fs::read_to_string(path.as_ref()).map_err(|error| Error::Read(origin.clone(), error))?;

        Self::parse(&content, &origin)
    }

    pub(crate) fn parse(content: &str, origin: &str) -> Result<Self, Error> {
        let mut entries = BTreeMap::new();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Malformed(origin.to_string(), number + 1))?;

            let key = key.trim();

            if key.is_empty() {
                return Err(Error::EmptyKey(origin.to_string(), number + 1));
            }

            entries.insert(key.to_string(), value.trim().to_string());
        }

        debug!("loaded {} configuration entr(y|ies) from `{origin}`", entries.len());

        Ok(Self { entries })
    }

    /// Get the value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterate over the keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over all `(key, value)` entries, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}
