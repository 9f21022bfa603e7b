use std::str::FromStr;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::format::{Format, Pretty};
use tracing_subscriber::fmt::Formatter;
use tracing_subscriber::{prelude::*, reload::Handle, EnvFilter};

static RELOAD_HANDLE: OnceCell<Handle<EnvFilter, Formatter<Pretty, Format<Pretty>>>> =
    OnceCell::new();

/// Initializes the global tracing subscriber with the given env-filter level.
/// Calling this again reloads the filter instead of installing a new
/// subscriber.
pub fn init(level: &str) -> Result<()> {
    let reload = RELOAD_HANDLE.get_or_try_init(|| {
        let env_filter = EnvFilter::from_str(level).expect("failed to parse log level");

        let filter = tracing_subscriber::fmt()
            .pretty()
            .with_line_number(true)
            .with_file(true)
            .with_env_filter(env_filter)
            .with_filter_reloading();

        let handle = filter.reload_handle();

        filter.finish().try_init().map(|_| handle)
    })?;

    reload.reload(level)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn test_init() {
        init("info").expect("failed to init logger");
    }

    #[test]
    fn test_reinit() {
        init("info").expect("failed to init logger");
        init("debug").expect("failed to reload logger");
    }
}
