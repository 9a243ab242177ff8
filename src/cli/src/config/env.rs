#[derive(Debug, Clone, Default)]
pub(crate) struct Values {
  pub(crate) serial_port: Option<String>,
  pub(crate) tcp_host: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("Failed reading env var")]
  EnvVarRead(#[from] std::env::VarError),
}

pub(crate) fn parse() -> Result<Values, ParseError> {
  let _ = dotenv::dotenv();

  let values = Values {
    serial_port: optional("FIELDPOLL_SERIAL_PORT")?,
    tcp_host: optional("FIELDPOLL_TCP_HOST")?,
  };

  Ok(values)
}

fn optional(name: &str) -> Result<Option<String>, ParseError> {
  match std::env::var(name) {
    Ok(value) => Ok(Some(value)),
    Err(std::env::VarError::NotPresent) => Ok(None),
    Err(error) => Err(error.into()),
  }
}
