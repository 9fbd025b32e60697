//! # supabase
//!
//! Async Rust client for a Supabase-style Backend-as-a-Service: auth,
//! PostgREST-style database queries, object storage, and a Phoenix-Channels
//! realtime WebSocket service, behind a single [`Gateway`] facade that keeps
//! every service's credentials in sync with the current session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use supabase::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::builder("https://project.supabase.co", "anon-key").build()?;
//!     let client = Gateway::new(config)?;
//!
//!     let rows: Vec<serde_json::Value> = client
//!         .from("todos")
//!         .select("*")
//!         .eq("is_done", false)
//!         .execute()
//!         .await?
//!         .into_vec();
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod postgrest;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod transport;

pub use error::{Error, Result};
pub use gateway::Gateway;

/// `EnvFilter`-based `tracing` subscriber installer for test wiring only
/// (`RUST_LOG=supabase=debug cargo test -- --nocapture`). The library itself
/// never installs a global subscriber — that's the embedder's call.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub(crate) fn init_test_logging() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

/// Convenience re-exports for the common path: `use supabase::prelude::*;`
pub mod prelude {
    pub use crate::auth::{Auth, Subscription};
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::gateway::Gateway;
    pub use crate::postgrest::{Postgrest, QueryBuilder, QueryResult};
    pub use crate::realtime::{Channel, ChannelState, RealtimeManager};
    pub use crate::session::{AuthChangeEvent, Session, User};
    pub use crate::storage::{Storage, StorageBucket};
}
