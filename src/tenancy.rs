//! Tenancy context carried through every data-touching call.
//!
//! A [`TenancyContext`] is produced by the auth boundary in front of the
//! orchestrator (an HTTP middleware, or the `ask` CLI flags) and is never
//! synthesized inside the answering pipeline. It is immutable once built.

use std::collections::BTreeSet;

use crate::error::AskError;

/// Who is asking, on behalf of which tenant, with which roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenancyContext {
    tenant_id: String,
    caller_id: String,
    roles: BTreeSet<String>,
}

impl TenancyContext {
    /// Build a context, refusing an empty or whitespace-only tenant id.
    ///
    /// Role names are trimmed; empty role names are dropped.
    pub fn new<I, S>(
        tenant_id: impl Into<String>,
        caller_id: impl Into<String>,
        roles: I,
    ) -> Result<Self, AskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tenant_id = tenant_id.into().trim().to_string();
        if tenant_id.is_empty() {
            return Err(AskError::TenancyViolation(
                "tenant_id must not be empty".to_string(),
            ));
        }

        let roles = roles
            .into_iter()
            .map(|r| r.into().trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        Ok(Self {
            tenant_id,
            caller_id: caller_id.into(),
            roles,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Roles in sorted order.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
