//! Domain models for the identity module.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use idm_bakery::Op;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;

/// Username of the built-in administrator identity.
pub const ADMIN_USERNAME: &str = "admin@idm";

/// Group whose members may read any user's SSH keys.
pub const SSH_KEY_GETTER_GROUP: &str = "sshkeygetter@idm";

/// Group whose members may read any user's group list.
pub const GROUP_LIST_GROUP: &str = "grouplist@idm";

/// ACL member that grants access to every caller, authenticated or not.
pub const EVERYONE: &str = "everyone";

/// Prefix of the per-user ACL member allowed to create agents for that user.
pub const CREATE_AGENT_PREFIX: &str = "+create-agent@";

/// Kind half of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Global,
    User,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::User => "u",
        }
    }
}

/// The object an operation acts on, written `global` or `u-<username>`.
///
/// The wire form is split at the first `-`; `global-x` parses as a global
/// entity with name `x`, which no ACL admits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
}

impl Entity {
    #[must_use]
    pub fn global() -> Self {
        Self {
            kind: EntityKind::Global,
            name: String::new(),
        }
    }

    #[must_use]
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::User,
            name: username.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            write!(f, "{}-{}", self.kind.as_str(), self.name)
        }
    }
}

impl FromStr for Entity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s.split_once('-').unwrap_or((s, ""));
        let kind = match kind {
            "global" => EntityKind::Global,
            "u" => EntityKind::User,
            _ => return Err(IdentityError::BadRequest(format!("unknown entity kind in \"{s}\""))),
        };
        Ok(Self {
            kind,
            name: name.to_owned(),
        })
    }
}

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Verify,
    DischargeFor,
    CreateAgent,
    ReadAdmin,
    WriteAdmin,
    ReadGroups,
    WriteGroups,
    ReadSshKeys,
    WriteSshKeys,
    Login,
    ReadDischargeToken,
}

impl Action {
    pub const ALL: [Self; 12] = [
        Self::Read,
        Self::Verify,
        Self::DischargeFor,
        Self::CreateAgent,
        Self::ReadAdmin,
        Self::WriteAdmin,
        Self::ReadGroups,
        Self::WriteGroups,
        Self::ReadSshKeys,
        Self::WriteSshKeys,
        Self::Login,
        Self::ReadDischargeToken,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Verify => "verify",
            Self::DischargeFor => "dischargeFor",
            Self::CreateAgent => "createAgent",
            Self::ReadAdmin => "readAdmin",
            Self::WriteAdmin => "writeAdmin",
            Self::ReadGroups => "readGroups",
            Self::WriteGroups => "writeGroups",
            Self::ReadSshKeys => "readSSHKeys",
            Self::WriteSshKeys => "writeSSHKeys",
            Self::Login => "login",
            Self::ReadDischargeToken => "read-discharge-token",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| IdentityError::BadRequest(format!("unknown action \"{s}\"")))
    }
}

/// A typed (entity, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    pub entity: Entity,
    pub action: Action,
}

impl Operation {
    #[must_use]
    pub fn global(action: Action) -> Self {
        Self {
            entity: Entity::global(),
            action,
        }
    }

    #[must_use]
    pub fn user(username: impl Into<String>, action: Action) -> Self {
        Self {
            entity: Entity::user(username),
            action,
        }
    }

    /// Parses the untyped form carried in macaroons and on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BadRequest`] for an unknown entity kind or
    /// action.
    pub fn parse(op: &Op) -> Result<Self, IdentityError> {
        Ok(Self {
            entity: op.entity.parse()?,
            action: op.action.parse()?,
        })
    }
}

impl From<&Operation> for Op {
    fn from(op: &Operation) -> Self {
        Op::new(op.entity.to_string(), op.action.as_str())
    }
}

impl From<Operation> for Op {
    fn from(op: Operation) -> Self {
        Op::from(&op)
    }
}

/// A user's Ed25519/Curve25519-sized public key, base64 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidCaveat(format!("invalid public key \"{s}\""));
        let bytes = STANDARD.decode(s).map_err(|_| invalid())?;
        let key = <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| invalid())?;
        Ok(Self(key))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A stored identity.
///
/// `external_id` is set for identities that came from an external provider;
/// `owner` is set for agent identities created on behalf of another identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityRecord {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// How a single requested operation was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizedBy {
    /// An operation macaroon in the presented credential bundle at this index.
    Credential(usize),
    /// The resolved identity is a member of the operation's ACL.
    Identity,
    /// The operation's ACL admits everyone.
    Public,
}

/// A requested operation and what satisfied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedOp {
    pub entity: String,
    pub action: String,
    pub authorized_by: AuthorizedBy,
}

/// Successful authorization result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Username of the resolved identity, if one was needed or presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub authorized: Vec<AuthorizedOp>,
}

/// Proof that a login rendezvous resolved to a specific identity.
///
/// `value` is an encoded macaroon bundle declaring the username; it is only
/// valid until `expires`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DischargeToken {
    pub kind: String,
    pub value: String,
    pub expires: DateTime<Utc>,
}
