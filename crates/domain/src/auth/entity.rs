use serde::Serialize;

use super::rbac::Role;

/// An authenticated API caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn can_write(&self) -> bool {
        self.role.can_write()
    }
}
