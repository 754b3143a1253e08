// 🔐 Access control
//
// Principals, groups and the regional permission rule:
// - reads are open to every authenticated principal (anonymous may read too)
// - mutating a postmark requires membership in one of its responsible groups
// - superusers bypass the regional check
// An empty responsible set locks out everyone but superusers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CatalogError, CatalogResult};

surrogate_id!(
    /// Key of a user account
    UserId
);
surrogate_id!(
    /// Key of an access-control group
    GroupId
);

// ============================================================================
// GROUPS & USERS
// ============================================================================

/// Access-control group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Permission codenames (e.g. "change_postmark")
    pub permissions: Vec<String>,
}

/// User account as stored and exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Already-hashed password, never plaintext
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
    pub groups: Vec<GroupId>,
    pub user_permissions: Vec<String>,
}

impl User {
    /// Acting principal for this account.
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            username: self.username.clone(),
            groups: self.groups.iter().copied().collect(),
            is_superuser: self.is_superuser,
            is_authenticated: self.is_active,
        }
    }
}

// ============================================================================
// PRINCIPAL
// ============================================================================

/// The acting identity passed explicitly into every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub groups: BTreeSet<GroupId>,
    pub is_superuser: bool,
    pub is_authenticated: bool,
}

impl Principal {
    pub fn authenticated(
        user_id: UserId,
        username: String,
        groups: BTreeSet<GroupId>,
        is_superuser: bool,
    ) -> Self {
        Principal {
            user_id,
            username,
            groups,
            is_superuser,
            is_authenticated: true,
        }
    }

    pub fn anonymous() -> Self {
        Principal {
            user_id: UserId::UNSAVED,
            username: String::new(),
            groups: BTreeSet::new(),
            is_superuser: false,
            is_authenticated: false,
        }
    }

    pub fn belongs_to_any<'a, I>(&self, groups: I) -> bool
    where
        I: IntoIterator<Item = &'a Group>,
    {
        groups.into_iter().any(|g| self.groups.contains(&g.id))
    }
}

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Modify,
}

impl Action {
    /// GET / HEAD / OPTIONS are reads; everything else mutates.
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" | "OPTIONS" => Action::Read,
            _ => Action::Modify,
        }
    }
}

/// Authenticated-or-read-only rule used for non-regional records.
pub fn authorize(principal: &Principal, action: Action) -> CatalogResult<()> {
    match action {
        Action::Read => Ok(()),
        Action::Modify if principal.is_authenticated => Ok(()),
        Action::Modify => Err(CatalogError::PermissionDenied(
            "Authentication required".to_string(),
        )),
    }
}

/// Regional rule for postmarks and their images.
pub fn authorize_regional(
    principal: &Principal,
    action: Action,
    responsible: &[Group],
) -> CatalogResult<()> {
    if action == Action::Read {
        return Ok(());
    }
    authorize(principal, action)?;
    if principal.is_superuser || principal.belongs_to_any(responsible) {
        Ok(())
    } else {
        Err(CatalogError::PermissionDenied(
            "You are not responsible for this region".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: i64, name: &str) -> Group {
        Group {
            id: GroupId(id),
            name: name.to_string(),
            permissions: vec![],
        }
    }

    fn member_of(ids: &[i64]) -> Principal {
        Principal::authenticated(
            UserId(1),
            "editor".to_string(),
            ids.iter().map(|id| GroupId(*id)).collect(),
            false,
        )
    }

    #[test]
    fn test_read_is_unconditional() {
        assert!(authorize_regional(&Principal::anonymous(), Action::Read, &[]).is_ok());
        assert!(authorize_regional(&member_of(&[]), Action::Read, &[]).is_ok());
    }

    #[test]
    fn test_modify_requires_shared_group() {
        let responsible = vec![group(10, "Virginia editors")];

        assert!(authorize_regional(&member_of(&[10, 11]), Action::Modify, &responsible).is_ok());

        let denied = authorize_regional(&member_of(&[11]), Action::Modify, &responsible);
        assert!(matches!(denied, Err(CatalogError::PermissionDenied(_))));
    }

    #[test]
    fn test_empty_responsible_set_fails_closed() {
        assert!(authorize_regional(&member_of(&[10]), Action::Modify, &[]).is_err());

        let admin = Principal::authenticated(UserId(2), "admin".to_string(), BTreeSet::new(), true);
        assert!(authorize_regional(&admin, Action::Modify, &[]).is_ok());
    }

    #[test]
    fn test_anonymous_cannot_modify() {
        assert!(authorize(&Principal::anonymous(), Action::Modify).is_err());
        assert!(authorize(&member_of(&[]), Action::Modify).is_ok());
    }

    #[test]
    fn test_action_from_method() {
        assert_eq!(Action::from_method("get"), Action::Read);
        assert_eq!(Action::from_method("OPTIONS"), Action::Read);
        assert_eq!(Action::from_method("PATCH"), Action::Modify);
    }

    #[test]
    fn test_inactive_user_is_not_authenticated() {
        let user = User {
            id: UserId(4),
            username: "retired".to_string(),
            password: "pbkdf2_sha256$x".to_string(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: false,
            is_staff: false,
            is_superuser: false,
            last_login: None,
            date_joined: Utc::now(),
            groups: vec![GroupId(1)],
            user_permissions: vec![],
        };
        let principal = user.principal();
        assert!(!principal.is_authenticated);
        assert!(principal.groups.contains(&GroupId(1)));
    }
}
