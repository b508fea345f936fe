//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "funnel")]
#[command(version, about = "Ship piped log lines to rotated files or registered outputs")]
pub struct Cli {
    /// Config file; searched in /etc/funnel, ~/.funnel and . when omitted
    #[arg(short, long, env = "FUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from(["funnel", "--config", "/tmp/config.toml", "-vv"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.verbose, 2);
    }
}
