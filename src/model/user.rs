use serde::{Deserialize, Serialize};

const GUEST_INITIALS: &str = "GU";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub university: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
}

impl UserProfile {
    pub fn first_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
    }
}

/// Up to two upper-cased initials; guests get `GU`.
pub fn initials_of(name: Option<&str>) -> String {
    let initials: String = name
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect();

    if initials.is_empty() {
        GUEST_INITIALS.to_string()
    } else {
        initials
    }
}

/// Partial profile edit; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.university.is_none() && self.program.is_none()
    }

    pub fn apply(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.full_name {
            profile.full_name = Some(name.clone());
        }
        if let Some(university) = &self.university {
            profile.university = Some(university.clone());
        }
        if let Some(program) = &self.program {
            profile.program = Some(program.clone());
        }
    }
}

/// Account kept by the embedded auth backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_ts: i64,
}
