// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// `env` is the raw `RUST_LOG` value; unset or unparsable falls back to
/// `default_directives`.
fn filter_from(env: Option<&str>, default_directives: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives))
}

fn filter_or(default_directives: &str) -> EnvFilter {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(env.as_deref(), default_directives)
}

/// Installs the global compact subscriber. `RUST_LOG` wins over
/// `default_directives`; a second call is a no-op.
pub fn init_tracing(default_directives: &str) {
    let _ = fmt()
        .with_env_filter(filter_or(default_directives))
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing(DEFAULT_LOG_FILTER);
        init_tracing("debug");
        tracing::info!("still alive");
    }

    #[test]
    fn unset_env_uses_the_default_directives() {
        let filter = filter_from(None, "warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn env_directives_win_over_the_default() {
        let filter = filter_from(Some("debug"), "warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn unparsable_env_falls_back_to_the_default() {
        let filter = filter_from(Some("vkframe=bogus_level"), "warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn filter_or_reads_the_environment() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
            assert_eq!(filter_or("error").max_level_hint(), Some(LevelFilter::ERROR));
        }
    }
}
