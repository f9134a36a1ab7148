//! User registration and profiles

use std::sync::Arc;

use tracing::info;

use crate::error::LifecycleError;
use crate::lifecycle::Result;
use crate::model::{NewUser, User, UserId};
use crate::store::Store;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a user. Emails are compared case-insensitively.
    pub async fn register(&self, mut user: NewUser) -> Result<User> {
        user.email = user.email.trim().to_lowercase();
        user.display_name = user.display_name.trim().to_string();
        user.github_username = user
            .github_username
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());

        if user.email.is_empty() || !user.email.contains('@') {
            return Err(LifecycleError::Validation(format!(
                "invalid email: '{}'",
                user.email
            )));
        }
        if user.display_name.is_empty() {
            return Err(LifecycleError::Validation(
                "display name must not be empty".to_string(),
            ));
        }
        if self.store.exists_by_email(&user.email).await? {
            return Err(LifecycleError::EmailTaken(user.email));
        }

        let email = user.email.clone();
        // a concurrent registration can still win between the check and the insert
        let created = self
            .store
            .insert_user(user)
            .await?
            .ok_or(LifecycleError::EmailTaken(email))?;
        info!(
            "Registered user {} ({}) as {}",
            created.id,
            created.email,
            created.role.as_str()
        );
        Ok(created)
    }

    pub async fn profile(&self, id: UserId) -> Result<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| LifecycleError::user_not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::store::MemoryStore;

    fn service() -> UserService {
        UserService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_register_and_profile() {
        let users = service();
        let user = users
            .register(NewUser::new("  Dev@Example.com ", "Dev").with_github("devgh"))
            .await
            .unwrap();
        assert_eq!(user.email, "dev@example.com");
        assert_eq!(user.role, Role::Developer);
        assert_eq!(user.github_username.as_deref(), Some("devgh"));
        assert_eq!(user.reward_points, 0);

        assert_eq!(users.profile(user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let users = service();
        users
            .register(NewUser::new("dev@example.com", "Dev"))
            .await
            .unwrap();
        let err = users
            .register(NewUser::new("DEV@example.com", "Other"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::EmailTaken(email) if email == "dev@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let users = service();
        let err = users.register(NewUser::new("nope", "Dev")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let err = users
            .register(NewUser::new("a@example.com", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let err = users.profile(UserId(5)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { entity: "user", id: 5 }));
    }
}
