use domain::auth::entity::Principal;

use crate::http::error::ApiError;

/// Reject callers whose role cannot change daemon state.
pub fn require_write_access(principal: &Principal) -> Result<(), ApiError> {
    if !principal.can_write() {
        return Err(ApiError::Forbidden {
            code: "INSUFFICIENT_ROLE",
            message: format!("{} role cannot perform write operations", principal.role),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::auth::rbac::Role;

    #[test]
    fn admin_can_write() {
        assert!(require_write_access(&Principal::new("ops", Role::Admin)).is_ok());
    }

    #[test]
    fn viewer_cannot_write() {
        let err = require_write_access(&Principal::new("grafana", Role::Viewer)).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Forbidden {
                code: "INSUFFICIENT_ROLE",
                ..
            }
        ));
    }
}
