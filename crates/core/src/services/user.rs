//! User service.

use chrono::Utc;
use sea_orm::Set;
use serde::Deserialize;
use shelfmate_common::{AppError, AppResult, IdGenerator};
use shelfmate_db::{
    entities::user,
    repositories::{FriendshipRepository, UserRepository},
};
use validator::Validate;

/// User service for business logic.
#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    friendship_repo: FriendshipRepository,
    id_gen: IdGenerator,
}

/// Input for creating a new user.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    #[validate(length(min = 1, max = 32))]
    pub username: String,

    #[validate(length(max = 64))]
    pub name: Option<String>,

    #[validate(url)]
    pub avatar_url: Option<String>,

    #[validate(length(max = 512))]
    pub bio: Option<String>,
}

/// Input for updating the caller's profile.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileInput {
    #[validate(length(max = 64))]
    pub name: Option<String>,

    #[validate(url)]
    pub avatar_url: Option<String>,

    #[validate(length(max = 512))]
    pub bio: Option<String>,
}

impl UpdateProfileInput {
    const fn touches_snapshot(&self) -> bool {
        self.name.is_some() || self.avatar_url.is_some() || self.bio.is_some()
    }
}

impl UserService {
    /// Create a new user service.
    #[must_use]
    pub fn new(user_repo: UserRepository, friendship_repo: FriendshipRepository) -> Self {
        Self {
            user_repo,
            friendship_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a new user with a fresh access token.
    pub async fn create(&self, input: CreateUserInput) -> AppResult<user::Model> {
        input.validate()?;
        if !input
            .username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Validation(
                "username may only contain letters, digits and underscores".to_string(),
            ));
        }

        if self
            .user_repo
            .find_by_username(&input.username)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let model = user::ActiveModel {
            id: Set(self.id_gen.generate()),
            username_lower: Set(input.username.to_lowercase()),
            username: Set(input.username),
            token: Set(Some(self.id_gen.generate_token())),
            name: Set(input.name),
            avatar_url: Set(input.avatar_url),
            bio: Set(input.bio),
            friends_count: Set(0),
            pending_requests_count: Set(0),
            sent_requests_count: Set(0),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };

        let user = self.user_repo.create(model).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Get a user by ID.
    pub async fn get(&self, id: &str) -> AppResult<user::Model> {
        self.user_repo.get_by_id(id).await
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<user::Model>> {
        self.user_repo.find_by_username(username).await
    }

    /// Authenticate a user by token.
    pub async fn authenticate_by_token(&self, token: &str) -> AppResult<user::Model> {
        self.user_repo
            .find_by_token(token)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Update the caller's profile.
    ///
    /// Display fields are copied onto every relationship document naming the
    /// user so friend cards stay current.
    pub async fn update_profile(
        &self,
        id: &str,
        input: UpdateProfileInput,
    ) -> AppResult<user::Model> {
        input.validate()?;

        let user = self.user_repo.get_by_id(id).await?;
        let refresh = input.touches_snapshot();
        let mut active: user::ActiveModel = user.into();

        if let Some(name) = input.name {
            active.name = Set(Some(name).filter(|n| !n.is_empty()));
        }
        if let Some(avatar_url) = input.avatar_url {
            active.avatar_url = Set(Some(avatar_url));
        }
        if let Some(bio) = input.bio {
            active.bio = Set(Some(bio).filter(|b| !b.is_empty()));
        }
        active.updated_at = Set(Some(Utc::now().into()));

        let user = self.user_repo.update(active).await?;

        if refresh {
            let refreshed = self.friendship_repo.refresh_friend_snapshot(&user).await?;
            tracing::debug!(user_id = %user.id, refreshed, "Refreshed friend snapshots");
        }

        Ok(user)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use shelfmate_db::test_utils::user_fixture;
    use std::sync::Arc;

    fn service(db: MockDatabase) -> UserService {
        let db = Arc::new(db.into_connection());
        UserService::new(UserRepository::new(db.clone()), FriendshipRepository::new(db))
    }

    fn input(username: &str) -> CreateUserInput {
        CreateUserInput {
            username: username.to_string(),
            name: None,
            avatar_url: None,
            bio: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_taken_username() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user_fixture("u1", "alice")]]),
        );

        let result = service.create(input("Alice")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_username() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));

        assert!(matches!(
            service.create(input("")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.create(input("no spaces")).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_issues_token() {
        let created = user::Model {
            token: Some("t0ken".to_string()),
            ..user_fixture("u1", "alice")
        };
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()])
                .append_query_results([[created]]),
        );

        let user = service.create(input("alice")).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.token.is_some());
    }

    #[tokio::test]
    async fn test_authenticate_unknown_token() {
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()]),
        );

        let result = service.authenticate_by_token("nope").await;
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_update_profile_refreshes_snapshots() {
        let before = user_fixture("u1", "alice");
        let after = user::Model {
            name: Some("Alice".to_string()),
            ..before.clone()
        };
        let service = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[before]])
                .append_query_results([[after]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                }]),
        );

        let user = service
            .update_profile(
                "u1",
                UpdateProfileInput {
                    name: Some("Alice".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.name.as_deref(), Some("Alice"));
    }
}
