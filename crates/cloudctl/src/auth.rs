//! Authorization capability
//!
//! The policy engine is external; components receive an [`Authorizer`] at
//! construction and wrap each sensitive operation with [`authorized`].

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CloudError, Result};

/// Kind of access an operation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Admin,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
            Action::Admin => write!(f, "admin"),
        }
    }
}

/// Resource an operation touches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    Cluster,
    ConfigSet(String),
    Collection(String),
    Path(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Cluster => write!(f, "cluster"),
            Scope::ConfigSet(name) => write!(f, "configset:{}", name),
            Scope::Collection(name) => write!(f, "collection:{}", name),
            Scope::Path(path) => write!(f, "path:{}", path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Policy decision point
pub trait Authorizer: Send + Sync {
    fn authorize(&self, action: Action, scope: &Scope) -> Decision;
}

/// Permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _action: Action, _scope: &Scope) -> Decision {
        Decision::Allow
    }
}

/// Explicit allow list, optionally with an action-wide grant
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    granted_actions: HashSet<Action>,
    grants: HashSet<(Action, Scope)>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `action` on every scope
    pub fn grant_action(mut self, action: Action) -> Self {
        self.granted_actions.insert(action);
        self
    }

    /// Allow `action` on one scope
    pub fn grant(mut self, action: Action, scope: Scope) -> Self {
        self.grants.insert((action, scope));
        self
    }
}

impl Authorizer for StaticPolicy {
    fn authorize(&self, action: Action, scope: &Scope) -> Decision {
        if self.granted_actions.contains(&action)
            || self.grants.contains(&(action, scope.clone()))
        {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Check `action` on `scope`, then run `op`. The operation future is only
/// polled after an allow, so a deny performs no work at all.
pub async fn authorized<F, T>(
    authz: &dyn Authorizer,
    action: Action,
    scope: Scope,
    op: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match authz.authorize(action, &scope) {
        Decision::Allow => op.await,
        Decision::Deny => {
            warn!("Denied {} on {}", action, scope);
            Err(CloudError::Forbidden { action, scope })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_deny_does_no_work() {
        let policy = StaticPolicy::new().grant(Action::Read, Scope::Cluster);
        let ran = AtomicBool::new(false);

        let result = authorized(&policy, Action::Write, Scope::Cluster, async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(CloudError::Forbidden {
                action: Action::Write,
                ..
            })
        ));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_allow_runs_operation() {
        let policy = StaticPolicy::new().grant_action(Action::Read);
        let value = authorized(
            &policy,
            Action::Read,
            Scope::Collection("c1".to_string()),
            async { Ok(7) },
        )
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(
            AllowAll.authorize(Action::Admin, &Scope::Cluster),
            Decision::Allow
        );
    }
}
