use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dsr",
    about = "dsrpc: deduplicating key-value store over a framed RPC protocol",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Server to talk to for point operations and queries
    #[arg(long, global = true, default_value = "http://127.0.0.1:1516")]
    pub server: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the dsrpc server
    Serve(ServeArgs),
    /// Store a value under a key
    Put(PutArgs),
    /// Fetch the value stored under a key
    Get(GetArgs),
    /// Check whether a key exists
    Has(KeyArgs),
    /// Show the size of a stored value
    Size(KeyArgs),
    /// Remove a key
    Delete(KeyArgs),
    /// List entries under a prefix
    Query(QueryArgs),
    /// Check reference counts of a log-backed dedup store (offline)
    Verify(VerifyArgs),
    /// Rewrite a store log keeping only live records (offline)
    Compact(CompactArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Memory,
    Log,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    Dedup,
    PassThrough,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    #[arg(long)]
    pub backend: Option<BackendKind>,
    /// Log file for the log backend
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub mode: Option<ModeArg>,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    pub key: String,
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub value: Option<String>,
    /// Read the value from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub key: String,
    /// Write the value to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    #[arg(long, default_value = "")]
    pub prefix: String,
    #[arg(long)]
    pub keys_only: bool,
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Maximum entries to return; 0 means unbounded
    #[arg(short = 'n', long, default_value = "0")]
    pub limit: u64,
    #[arg(short = 'i', long)]
    pub ignore_case: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Store log file
    #[arg(long)]
    pub path: PathBuf,
    /// Configuration naming the store's collections and digest
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompactArgs {
    #[arg(long)]
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dsr").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn global_defaults() {
        let cli = parse(&["has", "k"]);
        assert_eq!(cli.server, "http://127.0.0.1:1516");
        assert!(!cli.verbose);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["get", "k", "--server", "http://h:1", "--format", "json", "-v"]);
        assert_eq!(cli.server, "http://h:1");
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
        match cli.command {
            Command::Get(args) => {
                assert_eq!(args.key, "k");
                assert!(args.out.is_none());
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn put_takes_value_or_file() {
        match parse(&["put", "k", "hello"]).command {
            Command::Put(args) => assert_eq!(args.value.as_deref(), Some("hello")),
            _ => panic!("expected put"),
        }
        match parse(&["put", "k", "--file", "v.bin"]).command {
            Command::Put(args) => {
                assert!(args.value.is_none());
                assert_eq!(args.file, Some(PathBuf::from("v.bin")));
            }
            _ => panic!("expected put"),
        }
        assert!(Cli::try_parse_from(["dsr", "put", "k"]).is_err());
        assert!(Cli::try_parse_from(["dsr", "put", "k", "v", "--file", "f"]).is_err());
    }

    #[test]
    fn query_flags() {
        match parse(&["query", "--prefix", "a/", "--keys-only", "--offset", "2", "-n", "5", "-i"]).command {
            Command::Query(args) => {
                assert_eq!(args.prefix, "a/");
                assert!(args.keys_only);
                assert_eq!(args.offset, 2);
                assert_eq!(args.limit, 5);
                assert!(args.ignore_case);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn serve_flags() {
        match parse(&["serve", "--bind", "0.0.0.0:9000", "--backend", "log", "--path", "s.log", "--mode", "pass-through"]).command {
            Command::Serve(args) => {
                assert_eq!(args.bind, Some("0.0.0.0:9000".parse().unwrap()));
                assert_eq!(args.backend, Some(BackendKind::Log));
                assert_eq!(args.mode, Some(ModeArg::PassThrough));
            }
            _ => panic!("expected serve"),
        }
        assert!(Cli::try_parse_from(["dsr", "serve", "--bind", "not-an-addr"]).is_err());
    }

    #[test]
    fn verify_requires_path() {
        assert!(Cli::try_parse_from(["dsr", "verify"]).is_err());
        assert!(matches!(parse(&["verify", "--path", "s.log"]).command, Command::Verify(_)));
    }
}
