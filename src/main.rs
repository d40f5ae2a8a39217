//! CLI entry point for the cToken exchange-rate monitor.
//!
//! # Architecture Flow
//!
//! ```text
//! main.rs (Runtime Initialization)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! 1. Config Layer (src/config.rs)      → Load environment variables
//! 2. RPC Layer (src/rpc/)              → Provider, observation feed, snapshots
//! 3. Monitor Layer (src/monitor.rs)    → Bootstrap, apply events, compare rates
//! 4. State Layer (src/state.rs)        → Pure accounting transitions
//! 5. Alert Layer (src/alert.rs, db/)   → Console and SQLite sinks
//! ```

use ctoken_rate_monitor::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    // LOG_FILE enables a daily-rotated JSON log; the guard must outlive the run.
    let settings = observability::LogSettings::from_env();

    let _guard = match observability::init_tracing(settings.level, settings.file, settings.json) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, fatal = e.is_fatal(), "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
