use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

/// Caller roles. Mutating operations require Admin or Staff; Viewer is
/// read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Staff,
    Viewer,
}

impl Role {
    pub fn can_mutate(&self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "STAFF" => Some(Role::Staff),
            "VIEWER" => Some(Role::Viewer),
            _ => None,
        }
    }
}

/// The already-authenticated caller identity the boundary hands to the
/// engine side. The core never sees raw credentials.
#[derive(Debug, Clone)]
pub struct Caller {
    pub subject: String,
    pub role: Role,
}

#[derive(Debug)]
struct UserEntry {
    password: String,
    role: Role,
}

/// Username → password + role, fixed at startup. Doubles as the pgwire
/// `AuthSource` for the cleartext-password handshake.
#[derive(Debug)]
pub struct StaffDirectory {
    users: HashMap<String, UserEntry>,
}

impl StaffDirectory {
    /// Parse a `user:password:role` comma-separated spec, e.g.
    /// `ana:s3cret:admin,luis:hunter2:staff,kiosk:kiosk:viewer`.
    pub fn from_spec(spec: &str) -> io::Result<Self> {
        let mut users = HashMap::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.splitn(3, ':');
            let (name, password, role) = match (parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(p), Some(r)) if !n.is_empty() && !p.is_empty() => (n, p, r),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("bad user entry: {entry:?} (expected user:password:role)"),
                    ));
                }
            };
            let role = Role::parse(role).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown role for user {name}: {role:?}"),
                )
            })?;
            users.insert(name.to_string(), UserEntry { password: password.to_string(), role });
        }
        if users.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no users configured",
            ));
        }
        Ok(Self { users })
    }

    /// Single-admin fallback: one user `admin` with the given password.
    pub fn single_admin(password: String) -> Self {
        let mut users = HashMap::new();
        users.insert(
            "admin".to_string(),
            UserEntry {
                password,
                role: Role::Admin,
            },
        );
        Self { users }
    }

    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.users.get(username).map(|u| u.role)
    }
}

/// `AuthSource` adapter over a shared directory — the same directory also
/// answers `role_of` for the wire-level role gate.
#[derive(Debug)]
pub struct DirectoryAuthSource(pub std::sync::Arc<StaffDirectory>);

#[async_trait]
impl AuthSource for DirectoryAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let username = login.user().unwrap_or("");
        match self.0.users.get(username) {
            Some(entry) => Ok(Password::new(None, entry.password.as_bytes().to_vec())),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28P01".into(),
                    format!("unknown user: {username}"),
                ))))
            }
        }
    }
}
