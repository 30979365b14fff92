use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CrudError, Result};

pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| CrudError::Validation(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| CrudError::Validation("logging already initialized".into()))
}
