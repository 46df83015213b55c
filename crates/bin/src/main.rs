//! `casm-bin` is the executable of `casm`.
//!
//! This crate contains all the implementation to make `casm` an executable
//! that can be used by happy users: it parses the command-line, drives the
//! assembler, prints each diagnostic on one line, and exits with a code
//! describing the failure class.

mod error;

use std::{
    env,
    path::{Path, PathBuf},
    process,
    sync::{Arc, Mutex},
};

use argh::FromArgs;
use casm_assembler::{
    diagnostics::Diagnostic, registry, Assembler, OptimizationLevel, OutputFormat,
};
use casm_errors::Result;
use casm_object::coil::Module;
use error::Error;
use log::debug;

fn default_output_file() -> PathBuf {
    PathBuf::from("out.bin")
}

/// The `casm` command is a COIL assembler: it reads a compact,
/// platform-neutral COIL module, validates and optimizes it, and emits
/// native code for a selected target architecture.
#[derive(Debug, FromArgs)]
struct Casm {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// print the registered targets and exit.
    #[argh(switch)]
    list_targets: bool,

    /// target name. Defaults to the host architecture.
    #[argh(option, short = 't')]
    target: Option<String>,

    /// optimization level: 0, 1, 2, 3 or s. Defaults to 1.
    #[argh(option, default = "OptimizationLevel::O1")]
    opt: OptimizationLevel,

    /// output format: object, assembly, executable or library. Defaults to
    /// object.
    #[argh(option, default = "OutputFormat::Object")]
    format: OutputFormat,

    /// target configuration file, of `key = value` entries.
    #[argh(option)]
    config: Option<PathBuf>,

    /// input module.
    #[argh(positional)]
    module: Option<PathBuf>,

    /// specify the name and location of the output file. If not specified,
    /// `out.bin` is used.
    #[argh(option, short = 'o', default = "default_output_file()")]
    output_file: PathBuf,
}

impl Casm {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        let mut raw_arguments = env::args_os();

        // `argv[0]` names the binary; only its base name matters for the
        // usage output.
        let command = raw_arguments.next().ok_or(Error::ProgramNameIsMissing)?;
        let command =
            Path::new(&command).file_name().unwrap_or(command.as_os_str()).to_string_lossy();

        // Everything handed to the argument parser must be valid Unicode.
        let arguments = raw_arguments
            .map(|argument| {
                argument.into_string().map_err(|argument| {
                    Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let arguments = arguments.iter().map(String::as_str).collect::<Vec<_>>();

        // Parse and build `Self`. `argh` signals `--help` as an "early
        // exit" carrying the usage text.
        match Casm::from_args(&[&command], &arguments) {
            Ok(casm) => Ok(casm),
            Err(early_exit) => match early_exit.status {
                Ok(()) => {
                    println!("{}", early_exit.output);

                    process::exit(0);
                }

                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }
}

fn main() {
    if let Err(error) = run() {
        let code = error.exit_code();

        eprintln!("{:?}", miette::Report::new(error));

        process::exit(code);
    }
}

fn run() -> Result<(), Error> {
    // Install the error report.
    Error::install_and_configure()?;

    // Wire the `log` facade to stderr; `CASM_LOG=<0..4>` selects the level.
    let verbosity = env::var("CASM_LOG")
        .ok()
        .and_then(|level| level.parse::<usize>().ok())
        .unwrap_or(0);
    let _ = stderrlog::new().verbosity(verbosity).init();

    // Build the command-line arguments.
    let casm = Casm::new()?;

    // Handle the `--explain` option.
    if let Some(error_code) = &casm.explain {
        println!("{}", Error::explain(error_code)?);

        return Ok(());
    }

    // Handle the `--list-targets` option.
    if casm.list_targets {
        for target in registry::all() {
            println!("{target}");
        }

        return Ok(());
    }

    let Some(module_path) = casm.module.clone() else {
        return Err(Error::MissingInput);
    };

    // Configure the assembler: every diagnostic prints on one line, and the
    // most severe record is kept around to be echoed on a failing exit.
    let mut assembler = Assembler::new();

    let most_severe: Arc<Mutex<Option<Diagnostic>>> = Arc::new(Mutex::new(None));
    let tracker = most_severe.clone();

    assembler.set_diagnostics_handler(move |diagnostic| {
        eprintln!("{diagnostic}");

        let mut slot = tracker.lock().unwrap();

        let replace = match &*slot {
            Some(previous) => diagnostic.severity >= previous.severity,
            None => true,
        };

        if replace {
            *slot = Some(diagnostic.clone());
        }
    });

    let result = drive(&mut assembler, &casm, &module_path);

    // Echo the most severe diagnostic, so it is visible even when the run
    // produced a lot of output.
    if result.is_err() {
        if let Some(diagnostic) = most_severe.lock().unwrap().as_ref() {
            eprintln!("{diagnostic}");
        }
    }

    result
}

fn drive(assembler: &mut Assembler, casm: &Casm, module_path: &Path) -> Result<(), Error> {
    let target_name = match &casm.target {
        Some(name) => name.clone(),
        None => registry::host()
            .map(|target| target.name().to_string())
            .ok_or(Error::NoDefaultTarget)?,
    };

    assembler.set_target(&target_name)?;
    assembler.set_optimization(casm.opt);
    assembler.set_output_format(casm.format);

    if let Some(config) = &casm.config {
        assembler.set_target_config(config)?;
    }

    debug!("loading `{}`", module_path.display());

    let module = Module::from_file(module_path)
        .map_err(|error| Error::Load(module_path.display().to_string(), error))?;

    // Take a deep breath, and here we are!
    assembler.process_module(&module)?;
    assembler.write_output(&casm.output_file)?;

    Ok(())
}
