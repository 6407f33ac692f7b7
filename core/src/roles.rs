//! Roles and the single role -> capability table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "hr")]
    Hr,
    #[serde(rename = "hrHead")]
    HrHead,
    #[serde(rename = "intern")]
    Intern,
    #[serde(rename = "communication")]
    Communication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    ManageUsers,
    ManageBatches,
    ManageTasks,
    SubmitTasks,
    ReviewLeave,
    ApplyLeave,
    MarkAttendance,
    ViewAttendance,
    SendNotifications,
    RaiseTicket,
    AssignTickets,
    ResolveTickets,
    UseChat,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::ManageUsers,
        Capability::ManageBatches,
        Capability::ManageTasks,
        Capability::SubmitTasks,
        Capability::ReviewLeave,
        Capability::ApplyLeave,
        Capability::MarkAttendance,
        Capability::ViewAttendance,
        Capability::SendNotifications,
        Capability::RaiseTicket,
        Capability::AssignTickets,
        Capability::ResolveTickets,
        Capability::UseChat,
    ];
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Hr => "hr",
            Role::HrHead => "hrHead",
            Role::Intern => "intern",
            Role::Communication => "communication",
        }
    }

    /// Whether this role is granted `cap` without any explicit permission.
    pub fn grants(&self, cap: Capability) -> bool {
        use Capability::*;

        match self {
            Role::Admin => true,
            Role::HrHead => matches!(
                cap,
                ManageUsers
                    | ManageBatches
                    | ManageTasks
                    | ReviewLeave
                    | ViewAttendance
                    | SendNotifications
                    | RaiseTicket
                    | AssignTickets
                    | ResolveTickets
                    | UseChat
            ),
            Role::Hr => matches!(
                cap,
                ManageBatches
                    | ManageTasks
                    | ReviewLeave
                    | ViewAttendance
                    | RaiseTicket
                    | ResolveTickets
                    | UseChat
            ),
            Role::Intern => matches!(
                cap,
                SubmitTasks | ApplyLeave | MarkAttendance | RaiseTicket | UseChat
            ),
            Role::Communication => matches!(cap, SendNotifications | RaiseTicket | UseChat),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|cap| self.grants(*cap))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "hr" => Ok(Role::Hr),
            "hrHead" | "hrhead" | "hr_head" => Ok(Role::HrHead),
            "intern" => Ok(Role::Intern),
            "communication" | "comm" => Ok(Role::Communication),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_everything() {
        assert_eq!(Role::Admin.capabilities().len(), Capability::ALL.len());
    }

    #[test]
    fn test_intern_cannot_assign_or_resolve() {
        assert!(Role::Intern.grants(Capability::RaiseTicket));
        assert!(Role::Intern.grants(Capability::UseChat));
        assert!(!Role::Intern.grants(Capability::AssignTickets));
        assert!(!Role::Intern.grants(Capability::ResolveTickets));
    }

    #[test]
    fn test_hr_head_assigns_but_hr_does_not() {
        assert!(Role::HrHead.grants(Capability::AssignTickets));
        assert!(!Role::Hr.grants(Capability::AssignTickets));
        assert!(Role::Hr.grants(Capability::ResolveTickets));
    }

    #[test]
    fn test_parse_role_strings() {
        assert_eq!("hrHead".parse::<Role>(), Ok(Role::HrHead));
        assert_eq!("intern".parse::<Role>(), Ok(Role::Intern));
        assert!("superuser".parse::<Role>().is_err());

        for role in [Role::Admin, Role::Hr, Role::HrHead, Role::Intern, Role::Communication] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn test_serde_uses_backend_strings() {
        let json = serde_json::to_string(&Role::HrHead).unwrap();
        assert_eq!(json, "\"hrHead\"");
        let role: Role = serde_json::from_str("\"communication\"").unwrap();
        assert_eq!(role, Role::Communication);
    }
}
