//! Authentication seam.
//!
//! The engine never manages credentials. An [`AuthProvider`] is injected
//! by the application root; it produces the authorization header for
//! remote requests and identifies the current user for per-user mirror
//! scoping.

use async_trait::async_trait;

/// Credential/identity capability supplied by the external auth collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authorization header value (e.g. `Bearer <token>`) for remote
    /// requests, or `None` when unauthenticated.
    async fn authorization_header(&self) -> Option<String>;

    /// Stable id of the authenticated user, or `None`.
    fn current_user(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }
}
