use serde::{Deserialize, Serialize};

/// The authenticated user's identity as the backend reports it.
///
/// The session manager owns the authoritative copy; screens hold
/// read-only snapshots and must re-read after any mutation they
/// trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Server-side avatar file reference, not a full URL.
    /// Resolve with `ApiClient::avatar_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    /// Build the post-update identity from a partial edit.
    ///
    /// The merge never happens in place: callers commit the returned
    /// value only after the backend has accepted the update.
    pub fn merged_with(&self, update: &ProfileUpdate) -> User {
        User {
            name: update.name.clone().unwrap_or_else(|| self.name.clone()),
            ..self.clone()
        }
    }
}

/// Partial profile edit sent to `PUT /users`.
///
/// Absent fields are omitted from the request body entirely; the
/// password pair is forwarded to the backend and never merged into
/// the in-memory identity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<String>,
}

impl ProfileUpdate {
    /// Convenience for the common rename-only edit.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}
