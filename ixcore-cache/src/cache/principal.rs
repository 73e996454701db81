//! Acting principal identity sources
//!
//! The key adapter asks a [`PrincipalSource`] for the name of whoever is acting
//! right now. Anything without an authenticated principal maps to [`GUEST_PRINCIPAL`].

use std::future::Future;

/// Name used when no principal is authenticated
pub const GUEST_PRINCIPAL: &str = "GUEST";

/// Supplies the name of the currently acting principal
pub trait PrincipalSource: Send + Sync {
    /// Current principal name, `None` when unauthenticated
    fn current_principal(&self) -> Option<String>;

    /// Current principal name with the guest fallback applied
    fn principal_name(&self) -> String {
        self.current_principal()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| GUEST_PRINCIPAL.to_string())
    }
}

/// Always unauthenticated
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestPrincipal;

impl PrincipalSource for GuestPrincipal {
    fn current_principal(&self) -> Option<String> {
        None
    }
}

/// Always the same principal, mostly for tools and tests
#[derive(Debug, Clone)]
pub struct FixedPrincipal(String);

impl FixedPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl PrincipalSource for FixedPrincipal {
    fn current_principal(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

tokio::task_local! {
    static CURRENT_PRINCIPAL: String;
}

/// Principal bound to the running tokio task.
///
/// Request handlers wrap their work in [`TaskPrincipal::scope`]; every gate call
/// made inside the scope is attributed to that principal. Outside a scope the
/// caller is a guest.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPrincipal;

impl TaskPrincipal {
    /// Run `fut` with `name` as the acting principal
    pub async fn scope<F>(name: impl Into<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_PRINCIPAL.scope(name.into(), fut).await
    }

    /// Run a synchronous closure with `name` as the acting principal
    pub fn sync_scope<R>(name: impl Into<String>, f: impl FnOnce() -> R) -> R {
        CURRENT_PRINCIPAL.sync_scope(name.into(), f)
    }
}

impl PrincipalSource for TaskPrincipal {
    fn current_principal(&self) -> Option<String> {
        CURRENT_PRINCIPAL.try_with(|name| name.clone()).ok()
    }
}
