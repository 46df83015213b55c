//! The assembler façade and its eight-stage pipeline.

use std::{fs, io, path::Path};

use casm_errors::error;
use casm_object::{
    coil::{
        FunctionDecl, Global, Instruction, Module, Relocation, SectionKind, ValidationError,
    },
    LittleEndian,
};
use log::debug;

use crate::{
    buffer::OutputBuffer,
    configuration::{Error as ConfigurationError, TargetConfiguration},
    diagnostics::{codes, Category, Diagnostic, DiagnosticSink, Location, Severity},
    optimizer::OptimizationLevel,
    target::{
        registry, EmitRequest, OutputFormat, Target, TargetContext, TargetError,
    },
};

error! {
    #[doc = "Errors of the assembly façade and pipeline."]
    #[doc = "\n"]
    #[doc = "Every failure is also reported through the diagnostics sink —"]
    #[doc = "its `(category, code)` record comes from the variant's"]
    #[doc = "`route` — and mirrored as a short string retrievable with"]
    #[doc = "[`Assembler::last_error`]."]
    pub enum Error {
        #[code = E002]
        #[route = target:1]
        #[message = "The requested target is not registered."]
        #[formatted_message("I don't know the `{0}` target.")]
        #[help = "Targets are looked up by exact name. List the registered ones with `casm --list-targets`."]
        UnknownTarget(String),

        #[route = target:3]
        #[message = "The target back-end failed to initialize."]
        #[formatted_message("the `{0}` target failed to initialize: {1}")]
        #[help = "This is a back-end defect; try another target."]
        TargetInitialization(String, TargetError),

        #[route = target:2]
        #[message = "No target is set."]
        #[help = "Call `set_target` before processing."]
        NoTarget,

        #[route = config:3]
        #[message = "Configuration was supplied before any target was set."]
        #[help = "Call `set_target` before `set_target_config`; the configuration applies to a target context."]
        ConfigurationWithoutTarget,

        #[code = E004]
        #[route = parser:2]
        #[message = "The module violates a container invariant."]
        #[formatted_message("the module is invalid: {0}")]
        #[help = "The module parsed, but its section layout is inconsistent. `casm --explain E004` lists the invariants."]
        InvalidModule(ValidationError),

        #[code = E004]
        #[route = parser:4]
        #[message = "The `function` section payload is malformed."]
        #[help = "The section table entry is sound, but the payload bytes do not parse."]
        MalformedFunctions,

        #[code = E004]
        #[route = parser:6]
        #[message = "The `global` section payload is malformed."]
        #[help = "The section table entry is sound, but the payload bytes do not parse."]
        MalformedGlobals,

        #[code = E004]
        #[route = parser:8]
        #[message = "The `code` section payload is malformed."]
        #[help = "The section table entry is sound, but the payload bytes do not parse."]
        MalformedCode,

        #[code = E004]
        #[route = parser:10]
        #[message = "The `relocation` section payload is malformed."]
        #[help = "The section table entry is sound, but the payload bytes do not parse."]
        MalformedRelocations,

        #[route = config:1]
        #[transparent]
        Configuration(#[from] ConfigurationError),

        #[code = E005]
        #[route = config:2]
        #[message = "The target rejected the configuration."]
        #[formatted_message("the target rejected the configuration: {0}")]
        #[help = "The keys a back-end understands, and their value ranges, are part of the back-end's documentation."]
        ConfigurationRejected(TargetError),

        #[code = E006]
        #[route = target:4]
        #[message = "The target rejected an instruction."]
        #[formatted_message("the target rejected an instruction: {0}")]
        #[help = "The module is well-formed, but carries an instruction this back-end cannot encode."]
        InvalidInstruction(TargetError),

        #[code = E006]
        #[route = target:5]
        #[message = "An instruction could not be lowered."]
        #[formatted_message("unable to lower an instruction: {0}")]
        #[help = "The module is well-formed, but carries an instruction this back-end cannot encode."]
        Lowering(TargetError),

        #[code = E006]
        #[route = codegen:1]
        #[message = "Emission failed."]
        #[formatted_message("emission failed: {0}")]
        #[help = "See `casm --explain E006`."]
        Emission(TargetError),

        #[code = E006]
        #[route = codegen:2]
        #[message = "A relocation could not be applied."]
        #[formatted_message("unable to apply a relocation: {0}")]
        #[help = "Relocation offsets are relative to the emitted code region, and symbols name globals of the module."]
        Relocation(TargetError),

        #[code = E007]
        #[route = general:3]
        #[message = "There is no output to write."]
        #[help = "Run `process_module` successfully before `write_output`."]
        NoOutput,

        #[code = E007]
        #[route = io:2]
        #[message = "The output could not be written."]
        #[formatted_message("I was not able to write the output to `{0}`: {1}.")]
        #[help = "Check the path and its permissions."]
        Write(String, io::Error),
    }
}

/// The assembler: owns the diagnostics sink, the optimization level, the
/// output format, the target context and the produced output.
///
/// The module handed to [`Self::process_module`] is borrowed for the call
/// only; the assembler never retains it.
#[derive(Debug)]
pub struct Assembler {
    diagnostics: DiagnosticSink,
    optimization: OptimizationLevel,
    format: OutputFormat,
    target: Option<TargetContext>,
    output: Option<OutputBuffer>,
    last_error: Option<String>,
}

impl Assembler {
    /// Create an assembler with default settings: optimization level 1,
    /// `object` output, no target.
    pub fn new() -> Self {
        // Make sure the registry is built before anything asks for it.
        registry::all();

        Self {
            diagnostics: DiagnosticSink::new(),
            optimization: OptimizationLevel::default(),
            format: OutputFormat::default(),
            target: None,
            output: None,
            last_error: None,
        }
    }

    /// All registered targets.
    pub fn targets(&self) -> &'static [Target] {
        registry::all()
    }

    /// The descriptor of the current target, if one is set.
    pub fn current_target(&self) -> Option<&'static Target> {
        self.target.as_ref().map(TargetContext::descriptor)
    }

    /// The diagnostics sink.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// The diagnostics sink, mutably; callers report their own records
    /// through it.
    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticSink {
        &mut self.diagnostics
    }

    /// Install a diagnostics handler, replacing the stderr fallback.
    pub fn set_diagnostics_handler(
        &mut self,
        handler: impl FnMut(&Diagnostic) + Send + 'static,
    ) {
        self.diagnostics.set_handler(handler);
    }

    /// The message of the last failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The current optimization level.
    pub fn optimization(&self) -> OptimizationLevel {
        self.optimization
    }

    /// Set the optimization level.
    pub fn set_optimization(&mut self, level: OptimizationLevel) {
        self.optimization = level;
    }

    /// Set the optimization level from its numeric form, 0 to 3. An
    /// out-of-range level is clamped to the default (level 1) with a
    /// warning.
    pub fn set_optimization_level(&mut self, level: u32) {
        match OptimizationLevel::from_level(level) {
            Some(level) => self.optimization = level,
            None => {
                self.diagnostics.report(
                    Severity::Warning,
                    Category::Optimizer,
                    codes::optimizer::UNKNOWN_LEVEL,
                    format!("optimization level {level} is out of range; defaulting to level 1"),
                );

                self.optimization = OptimizationLevel::O1;
            }
        }
    }

    /// The current output format.
    pub fn output_format(&self) -> OutputFormat {
        self.format
    }

    /// Set the output format.
    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.format = format;
    }

    /// Set the output format from its numeric form, 0 to 3. An out-of-range
    /// code is clamped to `object` with a warning.
    pub fn set_output_format_code(&mut self, code: u32) {
        match OutputFormat::from_code(code) {
            Some(format) => self.format = format,
            None => {
                self.diagnostics.report(
                    Severity::Warning,
                    Category::General,
                    codes::general::INVALID_ARGUMENT,
                    format!("output format code {code} is out of range; defaulting to `object`"),
                );

                self.format = OutputFormat::Object;
            }
        }
    }

    /// The produced output, once a `process_module` call has succeeded.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_ref().map(OutputBuffer::as_slice)
    }

    /// Set the target by registry name.
    ///
    /// Setting the already current target is an observational no-op, apart
    /// from one note. Switching targets finalizes the prior context and
    /// discards any produced output.
    pub fn set_target(&mut self, name: &str) -> Result<(), Error> {
        if let Some(context) = &self.target {
            if context.descriptor().name() == name {
                self.diagnostics.report(
                    Severity::Note,
                    Category::Target,
                    codes::target::UNCHANGED,
                    format!("the `{name}` target is already set"),
                );

                return Ok(());
            }
        }

        let Some(descriptor) = registry::get_by_name(name) else {
            return Err(self.fail(Error::UnknownTarget(name.to_string())));
        };

        let context = match TargetContext::create(descriptor) {
            Ok(context) => context,
            Err(error) => {
                return Err(self.fail(Error::TargetInitialization(name.to_string(), error)))
            }
        };

        // Dropping the prior context runs its `finalize`; the output it
        // produced goes with it.
        self.target = Some(context);
        self.output = None;

        Ok(())
    }

    /// Load a configuration file and apply it to the current target.
    pub fn set_target_config<P>(&mut self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        if self.target.is_none() {
            return Err(self.fail(Error::ConfigurationWithoutTarget));
        }

        let configuration = match TargetConfiguration::from_file(path) {
            Ok(configuration) => configuration,
            Err(error) => {
                // Point at the offending line when there is one.
                let location = match &error {
                    ConfigurationError::Malformed(origin, line)
                    | ConfigurationError::EmptyKey(origin, line) => Some(Location {
                        file: origin.clone(),
                        line: *line as u32,
                        column: 1,
                    }),
                    ConfigurationError::Read(_, _) => None,
                };

                return Err(self.fail_at(Error::Configuration(error), location));
            }
        };

        let applied = match self.target.as_mut() {
            Some(context) => context.apply_configuration(&configuration),
            None => Ok(()),
        };

        if let Err(error) = applied {
            return Err(self.fail(Error::ConfigurationRejected(error)));
        }

        Ok(())
    }

    /// Run the pipeline over `module`: validate, parse the function, global,
    /// code and relocation payloads, optimize, lower, and emit into a fresh
    /// output buffer.
    ///
    /// A failure leaves [`Self::last_error`] set; a later successful call
    /// clears it. The borrowed module is never retained.
    pub fn process_module(&mut self, module: &Module) -> Result<(), Error> {
        self.last_error = None;

        let result = Self::run_pipeline(
            &mut self.target,
            &mut self.diagnostics,
            self.optimization,
            self.format,
            module,
        );

        match result {
            Ok(output) => {
                self.output = Some(output);

                Ok(())
            }

            Err(error) => Err(self.fail(error)),
        }
    }

    /// Write the produced output to `path`. Fails when no output has been
    /// produced yet.
    pub fn write_output<P>(&mut self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        let Some(output) = &self.output else {
            return Err(self.fail(Error::NoOutput));
        };

        let written = fs::write(path.as_ref(), output.as_slice());

        if let Err(error) = written {
            let path = path.as_ref().display().to_string();

            return Err(self.fail(Error::Write(path, error)));
        }

        Ok(())
    }

    /// Report a failure once: a structured record into the sink — its
    /// category and code come from the error's declared route — the short
    /// string into `last_error`, and the error back to the caller.
    fn fail(&mut self, error: Error) -> Error {
        self.fail_at(error, None)
    }

    fn fail_at(&mut self, error: Error, location: Option<Location>) -> Error {
        let (category, code) = match error.route() {
            Some((category, code)) => {
                (Category::from_name(category).unwrap_or(Category::General), code)
            }
            None => (Category::General, 0),
        };

        let message = error.to_string();

        match location {
            Some(location) => self.diagnostics.report_at(
                Severity::Error,
                category,
                code,
                message.clone(),
                location,
            ),
            None => self.diagnostics.report(Severity::Error, category, code, message.clone()),
        }

        self.last_error = Some(message);

        error
    }

    fn run_pipeline(
        target: &mut Option<TargetContext>,
        diagnostics: &mut DiagnosticSink,
        optimization: OptimizationLevel,
        format: OutputFormat,
        module: &Module,
    ) -> Result<OutputBuffer, Error> {
        // Stage 1: preconditions.
        let Some(context) = target.as_mut() else {
            return Err(Error::NoTarget);
        };

        debug!("assembling for `{}`", context.descriptor().name());

        // Stage 2: container invariants.
        module.validate().map_err(Error::InvalidModule)?;

        // Stage 3: function declarations.
        let functions = match module.section(SectionKind::Function) {
            None => {
                diagnostics.report(
                    Severity::Warning,
                    Category::Parser,
                    codes::parser::NO_FUNCTIONS,
                    "the module carries no `function` section",
                );

                Vec::new()
            }

            Some(section) => FunctionDecl::read_table::<LittleEndian, ()>(section.payload())
                .map(|(_, functions)| functions)
                .map_err(|_| Error::MalformedFunctions)?,
        };

        debug!("{} function declaration(s)", functions.len());

        // Stage 4: globals.
        let globals = match module.section(SectionKind::Global) {
            None => {
                diagnostics.report(
                    Severity::Note,
                    Category::Parser,
                    codes::parser::NO_GLOBALS,
                    "the module carries no `global` section",
                );

                Vec::new()
            }

            Some(section) => Global::read_table::<LittleEndian, ()>(section.payload())
                .map(|(_, globals)| globals)
                .map_err(|_| Error::MalformedGlobals)?,
        };

        debug!("{} global(s)", globals.len());

        // Stage 5: optimization plan.
        let passes = optimization.passes();

        debug!("optimization level {optimization}, {} pass(es)", passes.len());

        // Stage 6: code. The pass list from stage 5 runs over the freshly
        // decoded stream, then every instruction is validated and lowered.
        let mut instructions = match module.section(SectionKind::Code) {
            None => {
                diagnostics.report(
                    Severity::Warning,
                    Category::Parser,
                    codes::parser::NO_CODE,
                    "the module carries no `code` section",
                );

                Vec::new()
            }

            Some(section) => Instruction::read_stream::<LittleEndian, ()>(section.payload())
                .map(|(_, instructions)| instructions)
                .map_err(|_| Error::MalformedCode)?,
        };

        for pass in passes {
            pass.run(&mut instructions);
        }

        let mut lowered = Vec::with_capacity(instructions.len());

        for instruction in &instructions {
            context.validate_instruction(instruction).map_err(Error::InvalidInstruction)?;
            lowered.push(context.map_instruction(instruction).map_err(Error::Lowering)?);
        }

        // Stage 7: relocations.
        let relocations = match module.section(SectionKind::Relocation) {
            None => {
                diagnostics.report(
                    Severity::Note,
                    Category::Parser,
                    codes::parser::NO_RELOCATIONS,
                    "the module carries no `relocation` section",
                );

                Vec::new()
            }

            Some(section) => Relocation::read_table::<LittleEndian, ()>(section.payload())
                .map(|(_, relocations)| relocations)
                .map_err(|_| Error::MalformedRelocations)?,
        };

        // Stage 8: emission.
        let mut output = OutputBuffer::new();
        let request = EmitRequest {
            module,
            format,
            functions: &functions,
            globals: &globals,
            instructions: &instructions,
            lowered: &lowered,
            relocations: &relocations,
        };

        context.generate_code(&request, &mut output).map_err(|error| match error {
            TargetError::RelocationOutOfRange { .. }
            | TargetError::RelocationOverflow { .. }
            | TargetError::UnknownSymbol { .. } => Error::Relocation(error),
            _ => Error::Emission(error),
        })?;

        debug!("emitted {} byte(s)", output.len());

        Ok(output)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
