//! Authentication boundary.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::config::ApiToken;
use crate::error::LevelingError;

/// Who is calling, and which company's projects they may touch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub company_id: Uuid,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn authenticate(&self, bearer_token: &str) -> Result<Principal, LevelingError>;
}

/// Fixed token table, loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuth {
    tokens: FxHashMap<String, Principal>,
}

impl StaticTokenAuth {
    pub fn new(tokens: &[ApiToken]) -> Self {
        let tokens = tokens
            .iter()
            .map(|t| {
                (
                    t.token.clone(),
                    Principal {
                        subject: t.subject.clone(),
                        company_id: t.company_id,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, subject: &str, company_id: Uuid) -> Self {
        self.tokens.insert(
            token.to_string(),
            Principal {
                subject: subject.to_string(),
                company_id,
            },
        );
        self
    }
}

#[async_trait]
impl AuthService for StaticTokenAuth {
    async fn authenticate(&self, bearer_token: &str) -> Result<Principal, LevelingError> {
        self.tokens
            .get(bearer_token)
            .cloned()
            .ok_or_else(|| LevelingError::Unauthorized("invalid or expired token".to_string()))
    }
}
