//! Command-line surface: the flags a ring member is started with.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "ringstore", about = "A Chord-ring distributed key-value store")]
pub struct Cli {
    /// Port this peer listens on.
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Address of an existing ring member to join through. Absent means
    /// start a brand new singleton ring.
    #[arg(short, long)]
    pub entry: Option<String>,

    /// Shut down automatically after this many seconds, for test harnesses
    /// that need a bounded-lifetime process.
    #[arg(long, default_value_t = 1200.0)]
    pub die_after_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design() {
        let cli = Cli::parse_from(["ringstore"]);
        assert_eq!(cli.port, 8000);
        assert_eq!(cli.entry, None);
        assert_eq!(cli.die_after_seconds, 1200.0);
    }

    #[test]
    fn entry_and_port_are_overridable() {
        let cli = Cli::parse_from(["ringstore", "-p", "9100", "-e", "127.0.0.1:9000"]);
        assert_eq!(cli.port, 9100);
        assert_eq!(cli.entry.as_deref(), Some("127.0.0.1:9000"));
    }
}
