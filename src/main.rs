use classasm::hello::{HelloStyle, DEFAULT_CLASS_NAME, DEFAULT_MESSAGE};
use classasm::jvm::class_file::ClassFile;
use classasm::jvm::{self, BinaryName, Name};
use classasm::runtime::{self, DynamicLoader, Host};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

/// Ways the command line tool can fail
#[derive(Debug)]
enum CliError {
    Assembly(jvm::Error),
    Runtime(runtime::Error),
    Io(io::Error),
    Usage(String),
    JavaFailed(process::ExitStatus),
}

impl From<jvm::Error> for CliError {
    fn from(err: jvm::Error) -> CliError {
        CliError::Assembly(err)
    }
}

impl From<runtime::Error> for CliError {
    fn from(err: runtime::Error) -> CliError {
        CliError::Runtime(err)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> CliError {
        CliError::Io(err)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Assembly(err) => write!(f, "assembly failed: {}", err),
            CliError::Runtime(err) => write!(f, "{}", err),
            CliError::Io(err) => write!(f, "I/O error: {}", err),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::JavaFailed(status) => write!(f, "`java` exited with {}", status),
        }
    }
}

fn main() -> Result<(), CliError> {
    env_logger::init();

    let matches = Command::new("classasm")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Assemble a \"Hello world\" JVM class and run it")
        .arg(
            Arg::new("class-name")
                .long("class-name")
                .value_name("CLASS_NAME")
                .default_value(DEFAULT_CLASS_NAME)
                .help("Binary name of the generated class (eg. `org/example/Hello`)"),
        )
        .arg(
            Arg::new("message")
                .long("message")
                .value_name("TEXT")
                .default_value(DEFAULT_MESSAGE)
                .help("Text the class prints"),
        )
        .arg(
            Arg::new("style")
                .long("style")
                .value_name("STYLE")
                .value_parser(["low-level", "adapter", "ops", "all"])
                .default_value("all")
                .help("Which assembler layer builds the class"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Write the class files under this directory"),
        )
        .arg(
            Arg::new("no-run")
                .long("no-run")
                .action(ArgAction::SetTrue)
                .help("Skip loading and running the class in-process"),
        )
        .arg(
            Arg::new("java")
                .long("java")
                .action(ArgAction::SetTrue)
                .requires("output-dir")
                .help("Also run the written class with `java` on PATH"),
        )
        .get_matches();

    let class_name = matches
        .get_one::<String>("class-name")
        .map_or(DEFAULT_CLASS_NAME, String::as_str);
    let message = matches
        .get_one::<String>("message")
        .map_or(DEFAULT_MESSAGE, String::as_str);
    let styles = match matches.get_one::<String>("style").map(String::as_str) {
        None | Some("all") => HelloStyle::ALL.to_vec(),
        Some(style) => vec![style.parse::<HelloStyle>().map_err(CliError::Usage)?],
    };
    let output_dir = matches.get_one::<PathBuf>("output-dir");

    for style in &styles {
        let class_file = style.assemble_class_file(class_name, message)?;
        let bytes = class_file.to_bytes()?;

        if let Some(output_dir) = output_dir {
            // Styles would overwrite each other's class file, so each gets its own directory
            let class_dir = if styles.len() > 1 {
                output_dir.join(style.name())
            } else {
                output_dir.clone()
            };
            write_class(&class_dir, class_name, &class_file)?;

            if matches.get_flag("java") {
                run_with_java(&class_dir, class_name)?;
            }
        }

        if !matches.get_flag("no-run") {
            log::info!("Running {} ({} style) in-process", class_name, style);
            let mut loader = DynamicLoader::new(Host::with_stdio()?);
            let class = loader.load(bytes)?;
            loader.invoke_main(&class)?;
        }
    }

    Ok(())
}

fn write_class(class_dir: &Path, class_name: &str, class_file: &ClassFile) -> io::Result<()> {
    let path = class_dir.join(format!("{}.class", class_name));
    log::info!("Writing '{}'", path.display());
    class_file.save_to_path(&path, true)
}

fn run_with_java(class_dir: &Path, class_name: &str) -> Result<(), CliError> {
    let java_name = BinaryName::from_string(class_name.to_owned())
        .map_err(CliError::Usage)?
        .to_java_name();
    log::info!("Running {} with `java`", java_name);

    let status = process::Command::new("java")
        .arg("-cp")
        .arg(class_dir)
        .arg(&java_name)
        .status()?;
    if !status.success() {
        log::error!("`java` failed to run {}", java_name);
        return Err(CliError::JavaFailed(status));
    }
    Ok(())
}
