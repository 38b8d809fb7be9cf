//! Temporary database management
//!
//! Sandboxes are throwaway databases on the target's server. A sandbox only
//! exists for the duration of [`SandboxManager::scope`]; the database is
//! dropped on every exit path once creation has succeeded.

use crate::config::SandboxConfig;
use crate::connection::{DatabaseServer, Session};
use crate::error::AppResult;
use rand::Rng;
use tracing::{debug, info, warn};

/// A live sandbox: its database name and an open session on it
pub struct Sandbox<S> {
    pub name: String,
    pub session: S,
}

pub struct SandboxManager<'a, D: DatabaseServer> {
    server: &'a D,
    config: &'a SandboxConfig,
}

impl<'a, D: DatabaseServer> SandboxManager<'a, D> {
    pub fn new(server: &'a D, config: &'a SandboxConfig) -> Self {
        Self { server, config }
    }

    /// Prefix followed by random lowercase letters
    pub fn temporary_name(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..self.config.suffix_len)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        format!("{}{}", self.config.prefix, suffix)
    }

    /// Create a sandbox, run `body` against it, then tear it down.
    ///
    /// Teardown rolls back any open transaction, closes the session and
    /// drops the database, whether `body` succeeded or not. When both the
    /// body and teardown fail, the body's error is returned.
    pub async fn scope<T, F>(&self, body: F) -> AppResult<T>
    where
        F: AsyncFnOnce(&mut Sandbox<D::Session>) -> AppResult<T>,
    {
        let name = self.temporary_name();
        self.server.create_database(&name).await?;
        info!(sandbox = %name, "🧪 Created sandbox database");

        let session = match self.server.open_session(&name).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(cleanup) = self.server.drop_database(&name).await {
                    warn!(sandbox = %name, "Failed to drop sandbox: {}", cleanup.detail());
                }
                return Err(e);
            }
        };

        let mut sandbox = Sandbox { name, session };
        let result = body(&mut sandbox).await;
        let cleanup = self.teardown(sandbox).await;

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!("Sandbox cleanup failed after an earlier error: {}", cleanup.detail());
                Err(e)
            }
        }
    }

    async fn teardown(&self, sandbox: Sandbox<D::Session>) -> AppResult<()> {
        let Sandbox { name, mut session } = sandbox;

        if let Err(e) = session.rollback().await {
            warn!(sandbox = %name, "Rollback failed: {}", e.detail());
        }
        let closed = session.close().await;
        let dropped = self.server.drop_database(&name).await;

        debug!(sandbox = %name, "🧹 Sandbox torn down");
        closed.and(dropped)
    }
}
