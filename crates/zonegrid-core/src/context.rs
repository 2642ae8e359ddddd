//! Per-request security context.

use serde::{Deserialize, Serialize};

/// Identity and credentials of the caller that issued a scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// "no", "yes" or "only"; storage visibility of deleted rows.
    #[serde(default = "default_read_deleted")]
    pub read_deleted: String,
    /// Caller token, forwarded when delegating to a child zone.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

fn default_read_deleted() -> String {
    "no".to_string()
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            roles: Vec::new(),
            is_admin: false,
            read_deleted: default_read_deleted(),
            auth_token: None,
            request_id: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self.is_admin = self.roles.iter().any(|r| r.eq_ignore_ascii_case("admin"));
        self
    }

    /// Administrative copy of this context. Identity and token are kept.
    pub fn elevated(&self) -> Self {
        let mut ctx = self.clone();
        ctx.is_admin = true;
        if !ctx.roles.iter().any(|r| r.eq_ignore_ascii_case("admin")) {
            ctx.roles.push("admin".to_string());
        }
        ctx
    }

    /// Internal admin context with no caller identity.
    pub fn admin() -> Self {
        Self::new("", "").elevated()
    }
}
