//! Identity and role lookup.
//!
//! The default roster is a TOML file of members:
//!
//! ```toml
//! [[member]]
//! username = "alice"
//! role = "student"
//! uid = 1001
//! ```
//!
//! `uid` ties a member to the Unix account whose D-Bus connections act as
//! them; members without one can be marked but cannot call the daemon.

use rollcall_core::{Identity, IdentityError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        })
    }
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad roster TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("bad roster username {username:?}: {source}")]
    Identity {
        username: String,
        #[source]
        source: IdentityError,
    },
    #[error("duplicate roster member {0}")]
    Duplicate(String),
    #[error("uid {0} is assigned to more than one roster member")]
    DuplicateUid(u32),
}

/// Resolves usernames to identities and reports their roles.
pub trait Roster: Send + Sync {
    fn resolve(&self, username: &str) -> Option<Identity>;

    fn role(&self, identity: &Identity) -> Option<Role>;

    /// The member a Unix account acts as.
    fn identity_for_uid(&self, uid: u32) -> Option<Identity>;

    fn has_role(&self, identity: &Identity, roles: &[Role]) -> bool {
        self.role(identity).is_some_and(|role| roles.contains(&role))
    }
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    member: Vec<MemberEntry>,
}

#[derive(Debug, Deserialize)]
struct MemberEntry {
    username: String,
    role: Role,
    #[serde(default)]
    uid: Option<u32>,
}

/// In-memory roster, usually loaded from TOML.
#[derive(Debug, Clone, Default)]
pub struct TomlRoster {
    members: BTreeMap<Identity, Role>,
    uids: BTreeMap<u32, Identity>,
}

impl TomlRoster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let src = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn from_toml_str(src: &str) -> Result<Self, RosterError> {
        let file: RosterFile = toml::from_str(src)?;
        let mut members = BTreeMap::new();
        let mut uids = BTreeMap::new();
        for entry in file.member {
            let identity =
                Identity::new(entry.username.clone()).map_err(|source| RosterError::Identity {
                    username: entry.username.clone(),
                    source,
                })?;
            if let Some(uid) = entry.uid {
                if uids.insert(uid, identity.clone()).is_some() {
                    return Err(RosterError::DuplicateUid(uid));
                }
            }
            if members.insert(identity, entry.role).is_some() {
                return Err(RosterError::Duplicate(entry.username));
            }
        }
        Ok(Self { members, uids })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Roster for TomlRoster {
    fn resolve(&self, username: &str) -> Option<Identity> {
        let identity = Identity::new(username).ok()?;
        self.members.contains_key(&identity).then_some(identity)
    }

    fn role(&self, identity: &Identity) -> Option<Role> {
        self.members.get(identity).copied()
    }

    fn identity_for_uid(&self, uid: u32) -> Option<Identity> {
        self.uids.get(&uid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[member]]
        username = "admin"
        role = "admin"
        uid = 0

        [[member]]
        username = "teacher1"
        role = "teacher"
        uid = 1000

        [[member]]
        username = "student1"
        role = "student"
    "#;

    #[test]
    fn test_parse_roster() {
        let roster = TomlRoster::from_toml_str(SAMPLE).unwrap();
        assert_eq!(roster.len(), 3);
        let teacher = roster.resolve("teacher1").unwrap();
        assert_eq!(roster.role(&teacher), Some(Role::Teacher));
        assert!(roster.has_role(&teacher, &[Role::Admin, Role::Teacher]));
        assert!(!roster.has_role(&teacher, &[Role::Student]));
    }

    #[test]
    fn test_unknown_and_invalid_usernames_do_not_resolve() {
        let roster = TomlRoster::from_toml_str(SAMPLE).unwrap();
        assert!(roster.resolve("nobody").is_none());
        assert!(roster.resolve("../admin").is_none());
    }

    #[test]
    fn test_uid_maps_to_member() {
        let roster = TomlRoster::from_toml_str(SAMPLE).unwrap();
        assert_eq!(roster.identity_for_uid(0).unwrap().as_str(), "admin");
        assert_eq!(roster.identity_for_uid(1000).unwrap().as_str(), "teacher1");
        // student1 has no uid
        assert!(roster.identity_for_uid(1001).is_none());
    }

    #[test]
    fn test_rejects_shared_uid() {
        let shared = r#"
            [[member]]
            username = "a"
            role = "student"
            uid = 1001
            [[member]]
            username = "b"
            role = "student"
            uid = 1001
        "#;
        assert!(matches!(
            TomlRoster::from_toml_str(shared),
            Err(RosterError::DuplicateUid(1001))
        ));
    }

    #[test]
    fn test_empty_roster() {
        let roster = TomlRoster::from_toml_str("").unwrap();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_bad_names() {
        let dup = r#"
            [[member]]
            username = "a"
            role = "student"
            [[member]]
            username = "a"
            role = "teacher"
        "#;
        assert!(matches!(TomlRoster::from_toml_str(dup), Err(RosterError::Duplicate(_))));

        let bad = r#"
            [[member]]
            username = "a b"
            role = "student"
        "#;
        assert!(matches!(TomlRoster::from_toml_str(bad), Err(RosterError::Identity { .. })));

        let bad_role = r#"
            [[member]]
            username = "a"
            role = "janitor"
        "#;
        assert!(matches!(TomlRoster::from_toml_str(bad_role), Err(RosterError::Parse(_))));
    }
}
