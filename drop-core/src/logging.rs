//! Logging setup shared by the codedrop binaries.

use std::io::Write;

use env_logger::{Builder, Env, Target};

/// Initialise `env_logger` once. `RUST_LOG` overrides `default_filter` (e.g. "info").
pub fn init(default_filter: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_filter))
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
