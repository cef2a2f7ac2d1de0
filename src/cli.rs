use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use typereg_extract::models::Source;
use typereg_pipeline::Upstream;
use typereg_store::{Order, Sort};

#[derive(Parser, Debug)]
#[command(name = "typereg", version, about, arg_required_else_help = true)]
pub struct Args {
    /// Configuration file (defaults to typereg.toml in the user config directory)
    #[arg(short, long, global = true, value_name = "PATH", env = "TYPEREG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (ignored when RUST_LOG is set)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the queue workers until interrupted
    Worker {
        /// Only index these upstreams (default: all)
        #[arg(short, long = "upstream", value_enum)]
        upstreams: Vec<UpstreamArg>,
    },
    /// Index new commits inline, without the queue, printing progress as JSON lines
    Sync {
        #[arg(short, long = "upstream", value_enum)]
        upstreams: Vec<UpstreamArg>,
        /// File changes of a commit indexed in parallel (default from configuration)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show the latest indexed commit of each upstream
    Status {
        #[arg(short, long = "upstream", value_enum)]
        upstreams: Vec<UpstreamArg>,
    },
    /// Search entries
    Search {
        /// Case-insensitive substring of the entry name
        query: Option<String>,
        /// Exact entry name
        #[arg(long)]
        name: Option<String>,
        /// Restrict to these sources
        #[arg(short, long = "source", value_parser = parse_source)]
        sources: Vec<Source>,
        /// Only ambient sources
        #[arg(long, conflicts_with = "modules")]
        ambient: bool,
        /// Only module sources
        #[arg(long)]
        modules: bool,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,
        #[arg(long, value_enum, default_value_t = OrderArg::Asc)]
        order: OrderArg,
    },
    /// Show one entry
    Entry {
        #[arg(value_parser = parse_source)]
        source: Source,
        name: String,
    },
    /// List the active versions of an entry
    Versions {
        #[arg(value_parser = parse_source)]
        source: Source,
        name: String,
        /// Semver range the versions must satisfy
        #[arg(long)]
        range: Option<String>,
    },
    /// Show one version by tag, deprecated or not
    Tag {
        #[arg(value_parser = parse_source)]
        source: Source,
        name: String,
        tag: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamArg {
    DefinitelyTyped,
    Registry,
}

impl From<UpstreamArg> for Upstream {
    fn from(arg: UpstreamArg) -> Self {
        match arg {
            UpstreamArg::DefinitelyTyped => Self::DefinitelyTyped,
            UpstreamArg::Registry => Self::Registry,
        }
    }
}

/// The selected upstreams, or all of them.
pub fn upstreams(selected: &[UpstreamArg]) -> Vec<Upstream> {
    if selected.is_empty() {
        return Upstream::ALL.to_vec();
    }
    let mut upstreams: Vec<Upstream> = selected.iter().map(|&arg| arg.into()).collect();
    upstreams.dedup();
    upstreams
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortArg {
    Name,
    Updated,
}

impl From<SortArg> for Sort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => Self::Name,
            SortArg::Updated => Self::Updated,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for Order {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Asc => Self::Asc,
            OrderArg::Desc => Self::Desc,
        }
    }
}

fn parse_source(value: &str) -> Result<Source, String> {
    value.parse().map_err(|_| {
        let known: Vec<&str> = Source::ALL.iter().map(Source::as_str).collect();
        format!("unknown source {value:?}, expected one of: {}", known.join(", "))
    })
}
