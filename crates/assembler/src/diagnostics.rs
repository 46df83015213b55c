//! The structured report sink every component reports through.
//!
//! A [`Diagnostic`] is a `(severity, category, code, message)` record with an
//! optional source location. Reports either go to an installed handler or to
//! stderr, one canonical line per record. The sink counts records per
//! severity, so a caller can decide success or failure independently of
//! return codes.

use std::fmt;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Purely informational.
    Note,
    /// Suspicious, but the operation carries on.
    Warning,
    /// The operation failed.
    Error,
    /// The operation failed and the sink is poisoned.
    Fatal,
}

impl Severity {
    /// Stable lowercase name of the severity.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Note => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Fatal => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Which component a diagnostic comes from. Numeric codes are local to their
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Everything that fits nowhere else.
    General,
    /// Module loading and section payload parsing.
    Parser,
    /// Target lookup, contexts and lowering.
    Target,
    /// The optimization stage.
    Optimizer,
    /// Emission.
    Codegen,
    /// File reading and writing.
    Io,
    /// Target configuration.
    Config,
}

impl Category {
    /// Stable lowercase name of the category.
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Parser => "parser",
            Self::Target => "target",
            Self::Optimizer => "optimizer",
            Self::Codegen => "codegen",
            Self::Io => "io",
            Self::Config => "config",
        }
    }

    /// Map a stable name back to its category.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "general" => Some(Self::General),
            "parser" => Some(Self::Parser),
            "target" => Some(Self::Target),
            "optimizer" => Some(Self::Optimizer),
            "codegen" => Some(Self::Codegen),
            "io" => Some(Self::Io),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// The category-local diagnostic codes.
pub mod codes {
    /// `general` category.
    pub mod general {
        /// A caller passed an out-of-range value.
        pub const INVALID_ARGUMENT: u32 = 1;
        /// `write_output` was called before any output was produced.
        pub const NO_OUTPUT: u32 = 3;
    }

    /// `parser` category.
    pub mod parser {
        /// The module bytes could not be parsed.
        pub const MALFORMED: u32 = 1;
        /// The module violates a container invariant.
        pub const INVALID_MODULE: u32 = 2;
        /// The module carries no `function` section.
        pub const NO_FUNCTIONS: u32 = 3;
        /// The `function` section payload is malformed.
        pub const BAD_FUNCTIONS: u32 = 4;
        /// The module carries no `global` section.
        pub const NO_GLOBALS: u32 = 5;
        /// The `global` section payload is malformed.
        pub const BAD_GLOBALS: u32 = 6;
        /// The module carries no `code` section.
        pub const NO_CODE: u32 = 7;
        /// The `code` section payload is malformed.
        pub const BAD_CODE: u32 = 8;
        /// The module carries no `relocation` section.
        pub const NO_RELOCATIONS: u32 = 9;
        /// The `relocation` section payload is malformed.
        pub const BAD_RELOCATIONS: u32 = 10;
    }

    /// `target` category.
    pub mod target {
        /// No target of that name is registered.
        pub const UNKNOWN: u32 = 1;
        /// An operation needing a target ran without one.
        pub const NOT_SET: u32 = 2;
        /// The back-end failed to initialize.
        pub const INITIALIZATION: u32 = 3;
        /// The back-end rejected an instruction.
        pub const INVALID_INSTRUCTION: u32 = 4;
        /// The back-end could not lower an instruction.
        pub const LOWERING: u32 = 5;
        /// The requested target is already set.
        pub const UNCHANGED: u32 = 6;
    }

    /// `optimizer` category.
    pub mod optimizer {
        /// An out-of-range optimization level was requested.
        pub const UNKNOWN_LEVEL: u32 = 1;
    }

    /// `codegen` category.
    pub mod codegen {
        /// Emission failed.
        pub const EMISSION: u32 = 1;
        /// A relocation could not be applied.
        pub const RELOCATION: u32 = 2;
    }

    /// `io` category.
    pub mod io {
        /// A file could not be read.
        pub const READ: u32 = 1;
        /// A file could not be written.
        pub const WRITE: u32 = 2;
    }

    /// `config` category.
    pub mod config {
        /// The configuration file could not be loaded.
        pub const LOAD: u32 = 1;
        /// The target rejected the configuration.
        pub const APPLY: u32 = 2;
        /// Configuration was supplied before any target was set.
        pub const NO_TARGET: u32 = 3;
    }
}

/// An optional source location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// File the diagnostic refers to.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// One structured report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// Category. The code below is local to it.
    pub category: Category,
    /// Category-local numeric code, see [`codes`].
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Optional source location.
    pub location: Option<Location>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(formatter, "{}:{}:{}: ", location.file, location.line, location.column)?;
        }

        write!(formatter, "{}[{}:{}]: {}", self.severity, self.category, self.code, self.message)
    }
}

/// Per-severity report counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Number of notes reported so far.
    pub notes: u64,
    /// Number of warnings reported so far.
    pub warnings: u64,
    /// Number of errors reported so far.
    pub errors: u64,
    /// Number of fatals reported so far.
    pub fatals: u64,
}

/// A report handler. It receives each record by reference and must not retain
/// it beyond the call.
pub type Handler = Box<dyn FnMut(&Diagnostic) + Send>;

/// The report sink.
///
/// Without a handler, every record goes to stderr as one
/// `<severity>[<category>:<code>]: <message>` line. A `fatal` report poisons
/// the sink; reports are still accepted afterwards, but the owning pipeline
/// is expected to stop at its next check.
pub struct DiagnosticSink {
    handler: Option<Handler>,
    counts: [u64; 4],
    poisoned: bool,
}

impl DiagnosticSink {
    /// Create a sink with no handler.
    pub fn new() -> Self {
        Self { handler: None, counts: [0; 4], poisoned: false }
    }

    /// Install a handler. It replaces the stderr fallback and any previously
    /// installed handler.
    pub fn set_handler(&mut self, handler: impl FnMut(&Diagnostic) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Report a record without a location.
    pub fn report(
        &mut self,
        severity: Severity,
        category: Category,
        code: u32,
        message: impl Into<String>,
    ) {
        self.report_record(Diagnostic {
            severity,
            category,
            code,
            message: message.into(),
            location: None,
        });
    }

    /// Report a record with a source location.
    pub fn report_at(
        &mut self,
        severity: Severity,
        category: Category,
        code: u32,
        message: impl Into<String>,
        location: Location,
    ) {
        self.report_record(Diagnostic {
            severity,
            category,
            code,
            message: message.into(),
            location: Some(location),
        });
    }

    fn report_record(&mut self, diagnostic: Diagnostic) {
        self.counts[diagnostic.severity.index()] += 1;

        if diagnostic.severity == Severity::Fatal {
            self.poisoned = true;
        }

        match &mut self.handler {
            Some(handler) => handler(&diagnostic),
            None => eprintln!("{diagnostic}"),
        }
    }

    /// Per-severity report counts. Counters never decrease.
    pub fn counts(&self) -> Counts {
        Counts {
            notes: self.counts[Severity::Note.index()],
            warnings: self.counts[Severity::Warning.index()],
            errors: self.counts[Severity::Error.index()],
            fatals: self.counts[Severity::Fatal.index()],
        }
    }

    /// Number of reports of one severity.
    pub fn count(&self, severity: Severity) -> u64 {
        self.counts[severity.index()]
    }

    /// Number of `error` and `fatal` reports, the usual failure criterion.
    pub fn error_count(&self) -> u64 {
        self.count(Severity::Error) + self.count(Severity::Fatal)
    }

    /// Whether a `fatal` has been reported.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("DiagnosticSink")
            .field("handler", &self.handler.as_ref().map(|_| "..."))
            .field("counts", &self.counts)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_canonical_line() {
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            category: Category::Target,
            code: 1,
            message: "I don't know the `nosuch` target.".to_string(),
            location: None,
        };

        assert_eq!(diagnostic.to_string(), "error[target:1]: I don't know the `nosuch` target.");
    }

    #[test]
    fn test_canonical_line_with_location() {
        let diagnostic = Diagnostic {
            severity: Severity::Warning,
            category: Category::Config,
            code: 1,
            message: "suspicious entry".to_string(),
            location: Some(Location { file: "casm.conf".to_string(), line: 3, column: 1 }),
        };

        assert_eq!(diagnostic.to_string(), "casm.conf:3:1: warning[config:1]: suspicious entry");
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in [
            Category::General,
            Category::Parser,
            Category::Target,
            Category::Optimizer,
            Category::Codegen,
            Category::Io,
            Category::Config,
        ] {
            assert_eq!(Category::from_name(category.name()), Some(category));
        }

        assert_eq!(Category::from_name("kitchen"), None);
    }

    #[test]
    fn test_counts_are_monotonic() {
        let mut sink = DiagnosticSink::new();
        sink.set_handler(|_| ());

        assert_eq!(sink.counts(), Counts::default());

        sink.report(Severity::Note, Category::General, 0, "a");
        sink.report(Severity::Warning, Category::General, 0, "b");
        sink.report(Severity::Warning, Category::General, 0, "c");
        sink.report(Severity::Error, Category::General, 0, "d");

        let counts = sink.counts();

        assert_eq!(counts, Counts { notes: 1, warnings: 2, errors: 1, fatals: 0 });
        assert_eq!(sink.count(Severity::Warning), 2);
        assert_eq!(sink.error_count(), 1);
        assert!(!sink.is_poisoned());
    }

    #[test]
    fn test_fatal_poisons_the_sink() {
        let mut sink = DiagnosticSink::new();
        sink.set_handler(|_| ());

        sink.report(Severity::Fatal, Category::General, 0, "boom");

        assert!(sink.is_poisoned());
        assert_eq!(sink.error_count(), 1);

        // Poisoned sinks still accept reports.
        sink.report(Severity::Note, Category::General, 0, "still here");

        assert_eq!(sink.count(Severity::Note), 1);
    }

    #[test]
    fn test_handler_receives_records() {
        let received = Arc::new(Mutex::new(Vec::new()));

        let mut sink = DiagnosticSink::new();
        let recorder = received.clone();
        sink.set_handler(move |diagnostic| {
            recorder.lock().unwrap().push(diagnostic.clone());
        });

        sink.report(Severity::Error, Category::Parser, 2, "invalid module");

        let received = received.lock().unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].category, Category::Parser);
        assert_eq!(received[0].code, 2);
        assert_eq!(received[0].severity, Severity::Error);
    }
}
