//! The authenticated caller identity produced by JWT validation.

use crate::types::RealmRole;

/// Identity and claims of a caller who has presented a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    /// The `sub` claim — stable subject identifier at the issuer.
    pub subject: String,
    /// A human-readable username, if the issuer provides one (`preferred_username`/`name`).
    pub username: Option<String>,
    /// Realm roles carried in the token, used to gate `enable_server`.
    pub roles: Vec<RealmRole>,
    /// The raw bearer token, forwarded as the `subject_token` in RFC 8693 exchange.
    pub raw_token: String,
    /// Unix timestamp the token expires at (`exp` claim).
    pub expires_at: i64,
}

impl AuthenticatedPrincipal {
    /// Whether the principal carries the given role.
    pub fn has_role(&self, role: &RealmRole) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: Vec<&str>) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            subject: "user-1".to_string(),
            username: Some("alice".to_string()),
            roles: roles.into_iter().map(RealmRole::new).collect(),
            raw_token: "token".to_string(),
            expires_at: 0,
        }
    }

    #[test]
    fn has_role_matches_exact_role_string() {
        let p = principal(vec!["weather-reader"]);
        assert!(p.has_role(&RealmRole::new("weather-reader")));
        assert!(!p.has_role(&RealmRole::new("weather-admin")));
    }

    #[test]
    fn has_role_false_when_roles_empty() {
        let p = principal(vec![]);
        assert!(!p.has_role(&RealmRole::new("anything")));
    }
}
