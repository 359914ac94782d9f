use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::model::Role;

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Which secret family signed a token. Carried in the `Authorization` scheme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureLevel {
    Bearer,
    System,
}

impl SignatureLevel {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::User => SignatureLevel::Bearer,
            Role::Admin | Role::SuperAdmin => SignatureLevel::System,
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            SignatureLevel::Bearer => "Bearer",
            SignatureLevel::System => "System",
        }
    }

    /// Splits an `Authorization` header value into level and raw token.
    pub fn parse_header(value: &str) -> Option<(Self, &str)> {
        let (scheme, token) = value.trim().split_once(' ')?;
        let level = if scheme.eq_ignore_ascii_case("bearer") {
            SignatureLevel::Bearer
        } else if scheme.eq_ignore_ascii_case("system") {
            SignatureLevel::System
        } else {
            return None;
        };
        let token = token.trim();
        (!token.is_empty()).then_some((level, token))
    }
}

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // user ID
    pub role: Role,      // role at issuance
    pub kind: TokenKind, // token type
    pub iat: usize,      // issued at (unix seconds)
    pub exp: usize,      // expires at (unix seconds)
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
    /// Issuance instant in unix milliseconds, compared against the user's
    /// last credential change.
    pub epoch: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_scheme_selects_level() {
        assert_eq!(
            SignatureLevel::parse_header("Bearer abc"),
            Some((SignatureLevel::Bearer, "abc"))
        );
        assert_eq!(
            SignatureLevel::parse_header("system  xyz"),
            Some((SignatureLevel::System, "xyz"))
        );
        assert_eq!(SignatureLevel::parse_header("Basic abc"), None);
        assert_eq!(SignatureLevel::parse_header("Bearer "), None);
        assert_eq!(SignatureLevel::parse_header("abc"), None);
    }

    #[test]
    fn admins_sign_at_system_level() {
        assert_eq!(SignatureLevel::for_role(Role::User), SignatureLevel::Bearer);
        assert_eq!(SignatureLevel::for_role(Role::Admin), SignatureLevel::System);
        assert_eq!(SignatureLevel::for_role(Role::SuperAdmin), SignatureLevel::System);
    }
}
