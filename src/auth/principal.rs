use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::roles::Permission;

/// The authenticated user as seen by request handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub confirmed: bool,
    pub role_name: String,
    pub permissions: Permission,
}

impl CurrentUser {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_administrator(&self) -> bool {
        self.can(Permission::ADMINISTER)
    }
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            confirmed: user.confirmed,
            role_name: user.role_name,
            permissions: user.permissions,
        }
    }
}

/// Whoever is making the request.
#[derive(Debug, Clone)]
pub enum Principal {
    Authenticated(CurrentUser),
    Anonymous,
}

impl Principal {
    /// Anonymous callers hold no permissions.
    pub fn can(&self, permission: Permission) -> bool {
        match self {
            Principal::Authenticated(user) => user.can(permission),
            Principal::Anonymous => false,
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.can(Permission::ADMINISTER)
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Principal::Authenticated(user) => Some(user),
            Principal::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated(_))
    }

    /// Route guard: any signed-in caller.
    pub fn signed_in(&self) -> AppResult<&CurrentUser> {
        self.user().ok_or(AppError::Unauthorized)
    }

    /// Route guard: the caller must be signed in and hold `permission`.
    pub fn require(&self, permission: Permission) -> AppResult<&CurrentUser> {
        match self {
            Principal::Anonymous => Err(AppError::Unauthorized),
            Principal::Authenticated(user) if user.can(permission) => Ok(user),
            Principal::Authenticated(user) => {
                tracing::info!(
                    user = %user.username,
                    requested = %permission,
                    granted = %user.permissions,
                    "Permission denied"
                );
                Err(AppError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(permissions: Permission) -> CurrentUser {
        CurrentUser {
            id: "u-1".into(),
            username: "john".into(),
            email: "john@example.com".into(),
            confirmed: true,
            role_name: "User".into(),
            permissions,
        }
    }

    #[test]
    fn default_role_scenario() {
        let user = user_with(Permission::FOLLOW | Permission::COMMENT | Permission::WRITE_ARTICLES);
        let principal = Principal::Authenticated(user);
        assert!(principal.can(Permission::WRITE_ARTICLES));
        assert!(!principal.can(Permission::MODERATE_COMMENTS));
        assert!(!principal.is_administrator());
    }

    #[test]
    fn anonymous_can_nothing() {
        let anon = Principal::Anonymous;
        assert!(!anon.can(Permission::FOLLOW));
        assert!(!anon.can(Permission::ALL));
        assert!(!anon.is_administrator());
        assert!(anon.user().is_none());
    }

    #[test]
    fn require_distinguishes_anonymous_from_forbidden() {
        assert!(matches!(
            Principal::Anonymous.require(Permission::FOLLOW),
            Err(AppError::Unauthorized)
        ));

        let principal = Principal::Authenticated(user_with(Permission::FOLLOW));
        assert!(principal.require(Permission::FOLLOW).is_ok());
        assert!(matches!(
            principal.require(Permission::MODERATE_COMMENTS),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn signed_in_only_rejects_anonymous() {
        assert!(matches!(
            Principal::Anonymous.signed_in(),
            Err(AppError::Unauthorized)
        ));
        let principal = Principal::Authenticated(user_with(Permission::NONE));
        assert_eq!(principal.signed_in().unwrap().username, "john");
    }

    #[test]
    fn administrator_can_everything() {
        let principal = Principal::Authenticated(user_with(Permission::ALL));
        assert!(principal.is_administrator());
        assert!(principal.can(Permission::MODERATE_COMMENTS | Permission::WRITE_ARTICLES));
    }
}
