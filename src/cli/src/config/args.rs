#[derive(Debug, Clone, Default, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Values {
  /// Alternative configuration location
  #[arg(short, long)]
  pub(crate) config: Option<String>,

  /// Log at trace level regardless of the configured log level
  #[arg(short, long)]
  pub(crate) trace: bool,

  /// Channel to open and start polling right away
  #[arg(short, long = "start", value_name = "CHANNEL")]
  pub(crate) start: Vec<String>,

  /// List available serial ports and exit
  #[arg(long)]
  pub(crate) scan: bool,
}

pub(crate) fn parse() -> Values {
  clap::Parser::parse()
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[test]
  fn parses_repeated_start() {
    let values = Values::parse_from([
      "fieldpoll",
      "--start",
      "light",
      "-s",
      "vibration",
      "--trace",
    ]);

    assert_eq!(values.start, vec!["light", "vibration"]);
    assert!(values.trace);
    assert!(!values.scan);
    assert_eq!(values.config, None);
  }
}
