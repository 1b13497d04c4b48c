use serde::{Deserialize, Serialize};

use crate::error::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    CreateReservation,
    CancelOwnReservation,
    CancelAnyReservation,
    ConfirmPayment,
    CompleteReservation,
    RunSweeps,
}

impl Role {
    pub fn allows(&self, permission: Permission) -> bool {
        match self {
            Role::Staff => true,
            Role::Customer => matches!(
                permission,
                Permission::CreateReservation | Permission::CancelOwnReservation
            ),
        }
    }
}

/// Whoever is calling into the services. Resolved once at the boundary
/// (session, API gateway) and passed down explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: i64) -> Self {
        Self { id, role: Role::Customer }
    }

    pub fn staff(id: i64) -> Self {
        Self { id, role: Role::Staff }
    }

    /// Background jobs act as staff.
    pub fn system() -> Self {
        Self::staff(0)
    }

    pub fn require(&self, permission: Permission) -> Result<(), ReservationError> {
        if self.role.allows(permission) {
            Ok(())
        } else {
            Err(ReservationError::Forbidden(permission))
        }
    }

    pub fn label(&self) -> String {
        match self.role {
            Role::Customer => format!("customer:{}", self.id),
            Role::Staff if self.id == 0 => "system".to_string(),
            Role::Staff => format!("staff:{}", self.id),
        }
    }
}
