use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::auth::Claims;

/// Every account carries exactly one role. Authorization decisions go
/// through `is_privileged` instead of per-handler label lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Principal,
    Bursar,
    Hod,
    Teacher,
    Staff,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Principal => "principal",
            Role::Bursar => "bursar",
            Role::Hod => "hod",
            Role::Teacher => "teacher",
            Role::Staff => "staff",
            Role::Student => "student",
        }
    }

    /// Elevated read/write access across most resources.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Principal | Role::Bursar)
    }

    /// May record or edit academic data (attendance, discipline, marks).
    pub fn is_academic_staff(&self) -> bool {
        self.is_privileged() || matches!(self, Role::Hod | Role::Teacher)
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "principal" => Ok(Role::Principal),
            "bursar" => Ok(Role::Bursar),
            "hod" => Ok(Role::Hod),
            "teacher" => Ok(Role::Teacher),
            "staff" => Ok(Role::Staff),
            "student" => Ok(Role::Student),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn ensure_privileged(claims: &Claims) -> Result<(), HttpResponse> {
    if claims.role.is_privileged() {
        return Ok(());
    }

    Err(HttpResponse::Forbidden().json(json!({
        "error": "Elevated access required"
    })))
}

pub fn ensure_academic_staff(claims: &Claims) -> Result<(), HttpResponse> {
    if claims.role.is_academic_staff() {
        return Ok(());
    }

    Err(HttpResponse::Forbidden().json(json!({
        "error": "Staff access required"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("Bursar".parse::<Role>(), Ok(Role::Bursar));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" teacher ".parse::<Role>(), Ok(Role::Teacher));
        assert!("headmaster".parse::<Role>().is_err());
    }

    #[test]
    fn privilege_policy_is_centralized() {
        for role in [Role::Admin, Role::Principal, Role::Bursar] {
            assert!(role.is_privileged());
        }
        for role in [Role::Hod, Role::Teacher, Role::Staff, Role::Student] {
            assert!(!role.is_privileged());
        }
        assert!(Role::Hod.is_academic_staff());
        assert!(!Role::Student.is_academic_staff());
    }
}
