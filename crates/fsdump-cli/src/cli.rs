use std::path::PathBuf;

use clap::{ArgAction, Parser};

use fsdump_core::VERSION;

/// fsdump - Copy the contents of fscrypt-encrypted directories
#[derive(Parser)]
#[command(name = "fsdump")]
#[command(author, version = VERSION, about, long_about = None)]
pub struct Cli {
    /// Mountpoint of the filesystem holding the .fscrypt metadata
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,

    /// Encrypted directory to dump, relative to the mountpoint
    #[arg(short, long = "dir", value_name = "DIR", required = true, num_args = 1..)]
    pub dirs: Vec<PathBuf>,

    /// Directory the decrypted copies are written under
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Path to the config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable interactive prompts
    #[arg(long)]
    pub no_input: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Use ASCII symbols only
    #[arg(long)]
    pub ascii: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_multiple_dirs() {
        let cli = Cli::try_parse_from([
            "fsdump", "/mnt/data", "-d", "home/alice", "projects", "-o", "/tmp/out", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.mountpoint, PathBuf::from("/mnt/data"));
        assert_eq!(
            cli.dirs,
            vec![PathBuf::from("home/alice"), PathBuf::from("projects")]
        );
        assert_eq!(cli.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_output_dir_is_required() {
        assert!(Cli::try_parse_from(["fsdump", "/mnt/data", "-d", "secret"]).is_err());
    }

    #[test]
    fn test_dir_is_required() {
        assert!(Cli::try_parse_from(["fsdump", "/mnt/data", "-o", "/tmp/out"]).is_err());
    }
}
