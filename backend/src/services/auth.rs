//! Authentication and authorization
//!
//! Credentials are resolved to a [`Principal`] by an [`Authenticator`].
//! Replace and delete are allowed to the document's owner and to admins.

use crate::config::TokenGrant;
use crate::database::Document;
use crate::error::{AppError, Result};
use std::collections::HashMap;

/// An authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Principal {
    /// Fail with `Forbidden` unless this principal may modify `document`.
    pub fn authorize_change(&self, document: &Document) -> Result<()> {
        if self.is_admin || self.user_id == document.owner_id {
            return Ok(());
        }

        tracing::warn!(
            "User {} denied change to document {} owned by {}",
            self.user_id,
            document.id,
            document.owner_id
        );
        Err(AppError::Forbidden(format!(
            "document {} belongs to another user",
            document.id
        )))
    }
}

/// Resolves a request credential to a principal
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal>;
}

/// Authenticator backed by the static token map from the settings file
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: &HashMap<String, TokenGrant>) -> Self {
        let tokens = tokens
            .iter()
            .map(|(token, grant)| {
                (
                    token.clone(),
                    Principal {
                        user_id: grant.user_id,
                        is_admin: grant.is_admin,
                    },
                )
            })
            .collect();

        Self { tokens }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal> {
        let token = credential
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing credentials".to_string()))?;

        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| AppError::Unauthorized("unknown token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(owner_id: i64) -> Document {
        let now = Utc::now();
        Document {
            id: 1,
            title: "t".to_string(),
            body: String::new(),
            owner_id,
            original_filename: None,
            source_hash: None,
            source_size: 0,
            parsed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_static_tokens() {
        let grants = HashMap::from([(
            "secret".to_string(),
            TokenGrant {
                user_id: 3,
                is_admin: false,
            },
        )]);
        let auth = StaticTokenAuthenticator::new(&grants);

        assert_eq!(
            auth.authenticate(Some("secret")).unwrap(),
            Principal {
                user_id: 3,
                is_admin: false
            }
        );
        assert!(matches!(
            auth.authenticate(Some("wrong")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(auth.authenticate(None), Err(AppError::Unauthorized(_))));
        assert!(matches!(auth.authenticate(Some("  ")), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_owner_and_admin_may_change() {
        let owner = Principal {
            user_id: 5,
            is_admin: false,
        };
        let admin = Principal {
            user_id: 9,
            is_admin: true,
        };
        let other = Principal {
            user_id: 6,
            is_admin: false,
        };

        assert!(owner.authorize_change(&document(5)).is_ok());
        assert!(admin.authorize_change(&document(5)).is_ok());
        assert!(matches!(
            other.authorize_change(&document(5)),
            Err(AppError::Forbidden(_))
        ));
    }
}
