//! Operation to ACL mapping.

use identity_sdk::{
    ADMIN_USERNAME, Action, CREATE_AGENT_PREFIX, EVERYONE, EntityKind, GROUP_LIST_GROUP,
    Operation, SSH_KEY_GETTER_GROUP,
};
use idm_bakery::Op;

/// Computes the ACL of an operation.
///
/// Pure: the result depends only on the operation and the administrator
/// list fixed at construction.
#[derive(Debug, Clone)]
pub struct AclTable {
    admins: Vec<String>,
}

impl Default for AclTable {
    fn default() -> Self {
        Self::new(vec![ADMIN_USERNAME.to_owned()])
    }
}

impl AclTable {
    #[must_use]
    pub fn new(admins: Vec<String>) -> Self {
        Self { admins }
    }

    /// ACL for an untyped operation. Operations that do not parse get the
    /// empty ACL.
    #[must_use]
    pub fn acl_for(&self, op: &Op) -> Vec<String> {
        match Operation::parse(op) {
            Ok(op) => self.acl_for_operation(&op),
            Err(_) => {
                tracing::info!(entity = %op.entity, action = %op.action, "no ACL found for op");
                Vec::new()
            }
        }
    }

    #[must_use]
    pub fn acl_for_operation(&self, op: &Operation) -> Vec<String> {
        let name = op.entity.name.as_str();
        let acl = match (op.entity.kind, name.is_empty()) {
            (EntityKind::Global, true) => self.global_acl(op.action),
            (EntityKind::User, false) => self.user_acl(name, op.action),
            _ => None,
        };
        acl.unwrap_or_else(|| {
            tracing::info!(entity = %op.entity, action = %op.action, "no ACL found for op");
            Vec::new()
        })
    }

    fn global_acl(&self, action: Action) -> Option<Vec<String>> {
        match action {
            Action::Read | Action::DischargeFor => Some(self.admins.clone()),
            Action::Verify | Action::Login => Some(vec![EVERYONE.to_owned()]),
            _ => None,
        }
    }

    fn user_acl(&self, username: &str, action: Action) -> Option<Vec<String>> {
        let extra: Vec<String> = match action {
            Action::Read | Action::WriteSshKeys => vec![username.to_owned()],
            Action::CreateAgent => vec![format!("{CREATE_AGENT_PREFIX}{username}")],
            Action::ReadAdmin | Action::WriteAdmin | Action::WriteGroups => Vec::new(),
            Action::ReadGroups => vec![username.to_owned(), GROUP_LIST_GROUP.to_owned()],
            Action::ReadSshKeys => vec![username.to_owned(), SSH_KEY_GETTER_GROUP.to_owned()],
            _ => return None,
        };
        let mut acl = self.admins.clone();
        acl.extend(extra);
        Some(acl)
    }
}
