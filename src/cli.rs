//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Canonicalize identifier URIs and fetch their authority metadata.
///
/// URIs are taken from the command line, or one per line from stdin when
/// none are given.
#[derive(Parser, Debug)]
#[command(name = "uri-normalizer")]
#[command(author, version, about)]
#[command(after_help = "\
Without rules from --config or --rules, the bundled rule table is used
(rules.toml in the source tree: GeoNames, iDAI.gazetteer, Pleiades, VIAF,
GND, Wikidata, ORCID, PeriodO and ChronOntology). Copy it and point
`rules_file` in config.toml at the copy to extend it.")]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/uri-normalizer/config.toml)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra rule table (.json or .toml), appended after the configured rules;
    /// see rules.toml for the format
    #[arg(short = 'r', long, global = true, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the canonical form of each URI
    #[command(alias = "n")]
    Normalize(NormalizeArgs),

    /// Resolve each URI to its validated metadata URL
    #[command(alias = "r")]
    Resolve(UriArgs),

    /// Fetch and print the metadata of each URI
    #[command(alias = "f")]
    Fetch(UriArgs),
}

#[derive(ClapArgs, Debug)]
pub struct NormalizeArgs {
    /// Print unmatched URIs unchanged instead of failing
    #[arg(long)]
    pub no_require_match: bool,

    #[command(flatten)]
    pub input: UriArgs,
}

#[derive(ClapArgs, Debug)]
pub struct UriArgs {
    /// URIs to process
    #[arg(value_name = "URI")]
    pub uris: Vec<String>,
}

impl Command {
    pub fn uris(&self) -> &[String] {
        match self {
            Self::Normalize(args) => &args.input.uris,
            Self::Resolve(args) | Self::Fetch(args) => &args.uris,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_normalize_parses_uris() {
        let args = Args::try_parse_from([
            "uri-normalizer",
            "normalize",
            "http://geonames.org/1",
            "http://orcid.org/0000-0001-5000-0007",
        ])
        .unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        match &args.command {
            Command::Normalize(n) => assert!(!n.no_require_match),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(args.command.uris().len(), 2);
    }

    #[test]
    fn test_cli_no_require_match_flag() {
        let args =
            Args::try_parse_from(["uri-normalizer", "normalize", "--no-require-match", "x"]).unwrap();
        assert!(matches!(args.command, Command::Normalize(NormalizeArgs { no_require_match: true, .. })));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["uri-normalizer", "fetch", "-vv", "--config", "c.toml", "u"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(args.command, Command::Fetch(_)));
    }

    #[test]
    fn test_cli_aliases() {
        let args = Args::try_parse_from(["uri-normalizer", "r", "u"]).unwrap();
        assert!(matches!(args.command, Command::Resolve(_)));
    }

    #[test]
    fn test_cli_subcommand_is_required() {
        let result = Args::try_parse_from(["uri-normalizer"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Args::try_parse_from(["uri-normalizer", "--version"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let result = Args::try_parse_from(["uri-normalizer", "--invalid-flag"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
