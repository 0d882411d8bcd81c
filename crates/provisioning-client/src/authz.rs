//! Authorization predicate for device-facing calls

use std::collections::HashSet;

/// Who is calling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

/// Operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateNodes,
    GetNodes,
    UpdateNodes,
    DeleteNodes,
}

impl Action {
    pub fn is_write(self) -> bool {
        !matches!(self, Action::GetNodes)
    }
}

#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authorized(&self, ctx: &RequestContext, action: Action) -> bool;
}

/// Fixed answer; used when authorization is disabled
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthorizer {
    allow: bool,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

#[async_trait::async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_authorized(&self, _ctx: &RequestContext, _action: Action) -> bool {
        self.allow
    }
}

/// Grants reads to holders of a read or write role and writes to holders of
/// a write role. Roles may be tenant scoped as `<tenant>_<role>`.
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    read_roles: HashSet<String>,
    write_roles: HashSet<String>,
}

impl RoleAuthorizer {
    pub fn new<I, J>(read_roles: I, write_roles: J) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        Self {
            read_roles: read_roles.into_iter().map(Into::into).collect(),
            write_roles: write_roles.into_iter().map(Into::into).collect(),
        }
    }

    fn holds(ctx: &RequestContext, wanted: &HashSet<String>) -> bool {
        ctx.roles.iter().any(|role| {
            if wanted.contains(role) {
                return true;
            }
            match (&ctx.tenant_id, role.split_once('_')) {
                (Some(tenant), Some((prefix, bare))) => prefix == tenant && wanted.contains(bare),
                _ => false,
            }
        })
    }
}

#[async_trait::async_trait]
impl Authorizer for RoleAuthorizer {
    async fn is_authorized(&self, ctx: &RequestContext, action: Action) -> bool {
        if action.is_write() {
            Self::holds(ctx, &self.write_roles)
        } else {
            Self::holds(ctx, &self.read_roles) || Self::holds(ctx, &self.write_roles)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tenant: &str, roles: &[&str]) -> RequestContext {
        RequestContext {
            tenant_id: Some(tenant.to_string()),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_write_requires_write_role() {
        let authz = RoleAuthorizer::new(["node-r"], ["node-rw"]);
        assert!(authz.is_authorized(&ctx("t1", &["node-rw"]), Action::CreateNodes).await);
        assert!(!authz.is_authorized(&ctx("t1", &["node-r"]), Action::CreateNodes).await);
        assert!(authz.is_authorized(&ctx("t1", &["node-r"]), Action::GetNodes).await);
        assert!(authz.is_authorized(&ctx("t1", &["node-rw"]), Action::GetNodes).await);
    }

    #[tokio::test]
    async fn test_tenant_scoped_roles() {
        let authz = RoleAuthorizer::new(["node-r"], ["node-rw"]);
        assert!(authz.is_authorized(&ctx("t1", &["t1_node-rw"]), Action::DeleteNodes).await);
        assert!(!authz.is_authorized(&ctx("t1", &["t2_node-rw"]), Action::DeleteNodes).await);
    }

    #[tokio::test]
    async fn test_static() {
        assert!(StaticAuthorizer::allow_all().is_authorized(&RequestContext::default(), Action::UpdateNodes).await);
        assert!(!StaticAuthorizer::deny_all().is_authorized(&RequestContext::default(), Action::GetNodes).await);
    }
}
