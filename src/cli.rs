use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "entity-scan")]
#[command(about = "Find persistence entities and attribute converters in Java archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Worker threads for the scan; defaults to one per core.
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Scan a jar or an exploded class directory.
    Scan {
        archive: PathBuf,

        /// Dependency jar, or a directory searched for jars. Repeatable.
        #[arg(long, value_name = "DIR")]
        deps: Vec<PathBuf>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Run a single class file through decryption, parsing and categorization.
    Inspect {
        class_file: PathBuf,

        /// Entry path used for the decryption rule instead of the file path.
        #[arg(long, value_name = "NAME")]
        path: Option<String>,
    },
    /// Encrypt a plaintext class with the configured key.
    Seal {
        input: PathBuf,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_accepts_repeated_deps_and_globals() {
        let cli = Cli::parse_from([
            "entity-scan",
            "--threads",
            "2",
            "scan",
            "app.jar",
            "--deps",
            "lib",
            "--deps",
            "more/x.jar",
            "-f",
            "text",
        ]);
        assert_eq!(cli.threads, Some(2));
        assert!(!cli.log_json);
        match cli.command {
            Commands::Scan {
                archive,
                deps,
                format,
                output,
            } => {
                assert_eq!(archive, PathBuf::from("app.jar"));
                assert_eq!(deps, vec![PathBuf::from("lib"), PathBuf::from("more/x.jar")]);
                assert_eq!(format, OutputFormat::Text);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn seal_requires_output() {
        assert!(Cli::try_parse_from(["entity-scan", "seal", "Foo.class"]).is_err());
    }
}
