/**
 * Structured Logging
 *
 * Every process in the tree logs through `tracing`. Forked workers inherit
 * the subscriber installed by the supervisor and tag their events with a
 * `worker` span (group name, index, pid).
 */

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat{
    #[default]
    Pretty,
    Json,
}

/// Filter from `RUST_LOG` when set, `level` otherwise.
pub fn filter(level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError>{
    match EnvFilter::try_from_default_env(){
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

/// Install the global subscriber. Fails if `level` is not a valid filter
/// or a subscriber is already installed.
///
/// # Example
/// ```no_run
/// use drone_sync::logging::{self, LogFormat};
///
/// logging::init("info", LogFormat::Json).unwrap();
/// tracing::info!(connection = "tcp:localhost:12345", "ground station starting");
/// ```
pub fn init(level: &str, format: LogFormat) -> anyhow::Result<()>{
    let registry = tracing_subscriber::registry().with(filter(level)?);

    match format{
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_filter_accepts_directives(){
        assert!(EnvFilter::try_new("drone_sync=debug,warn").is_ok());
    }

    #[test]
    fn test_format_from_yaml(){
        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
