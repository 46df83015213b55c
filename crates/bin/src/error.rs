#[cfg(feature = "fancy-errors")]
use miette::{set_hook, MietteHandlerOpts};
use miette::{Diagnostic, InstallError, Result};
use thiserror::Error;

use casm_errors::Error as CasmError;

#[derive(Error, Diagnostic, Debug)]
pub(crate) enum Error {
    #[error("The argument `{0}` contains invalid Unicode data.")]
    InvalidArgumentEncoding(String),

    #[error("The program name is missing from the command-line.")]
    ProgramNameIsMissing,

    #[error("I was not able to read the command-line properly:\n{0}")]
    #[diagnostic(code(E001), help("See the command-line usage with `casm --help`."))]
    CommandLine(String),

    #[error("No input module was given.")]
    #[diagnostic(
        code(E001),
        help("Pass the module path as the positional argument: `casm <module> --target <name>`.")
    )]
    MissingInput,

    #[error("No target was given, and the host architecture has no registered back-end.")]
    #[diagnostic(
        code(E002),
        help("Pick a target explicitly with `--target <name>`; `--list-targets` prints the registered ones.")
    )]
    NoDefaultTarget,

    #[error("I was not able to load the `{0}` module: {1}")]
    #[diagnostic(code(E003), help("See `casm --explain E003`."))]
    Load(String, #[source] casm_object::coil::LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Assembler(#[from] casm_assembler::Error),

    #[error(transparent)]
    Install(#[from] InstallError),
}

impl Error {
    pub(crate) fn install_and_configure() -> Result<(), InstallError> {
        #[cfg(feature = "fancy-errors")]
        set_hook(Box::new(|_| {
            Box::new(
                MietteHandlerOpts::new()
                    .with_cause_chain()
                    .footer(
                        "For more information about an error, try \
                        `casm --explain <error>` where `<error>` \
                        has the `E[0-9]{{3}} pattern."
                            .to_string(),
                    )
                    .width(85)
                    .terminal_links(false)
                    .build(),
            )
        }))?;

        Ok(())
    }

    pub(crate) fn explain(error_code: &str) -> Result<&'static str, CasmError> {
        CasmError::explain(error_code)
    }

    /// The process exit code this failure maps to: 1 usage, 2 load or
    /// validation, 3 target, 4 code generation, 5 I/O.
    ///
    /// Assembler failures are classified by the category of their
    /// diagnostics-sink route.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgumentEncoding(_)
            | Self::ProgramNameIsMissing
            | Self::CommandLine(_)
            | Self::MissingInput
            | Self::Install(_) => 1,

            Self::Load(_, _) => 2,

            Self::NoDefaultTarget => 3,

            Self::Assembler(error) => match error.route().map(|(category, _)| category) {
                Some("parser") => 2,
                Some("target") | Some("config") => 3,
                Some("io") => 5,
                _ => 4,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::MissingInput.exit_code(), 1);
        assert_eq!(Error::NoDefaultTarget.exit_code(), 3);
        assert_eq!(
            Error::Assembler(casm_assembler::Error::UnknownTarget("nosuch".to_string()))
                .exit_code(),
            3
        );
        assert_eq!(Error::Assembler(casm_assembler::Error::MalformedCode).exit_code(), 2);
        assert_eq!(Error::Assembler(casm_assembler::Error::NoOutput).exit_code(), 4);
        assert_eq!(
            Error::Assembler(casm_assembler::Error::Write(
                "out.bin".to_string(),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
            .exit_code(),
            5
        );
    }
}
