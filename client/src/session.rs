use std::{
    error::Error,
    fmt, fs, io,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use directories::ProjectDirs;
use serde_json::json;

use common::data::{Role, User};

const TOKEN_FILE: &str = "token";
const USER_FILE: &str = "user.json";

#[derive(Debug)]
pub enum SessionError {
    EmptyCredentials,
    NoStateDir,
    Storage(io::Error),
    Corrupt(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCredentials => write!(f, "username and password must be non-empty"),
            Self::NoStateDir => write!(f, "no usable state directory on this system"),
            Self::Storage(e) => write!(f, "session storage error: {e}"),
            Self::Corrupt(s) => write!(f, "stored session is corrupt: {s}"),
        }
    }
}

impl Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(value: io::Error) -> Self {
        Self::Storage(value)
    }
}

/// On-disk session state: a bearer token and the user record it was minted
/// for, stored as two files under the user state directory. No token file
/// means no session.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn open() -> Result<Self, SessionError> {
        let dirs = ProjectDirs::from("", "", "filedeck").ok_or(SessionError::NoStateDir)?;
        Ok(Self::at(dirs.data_local_dir().to_path_buf()))
    }

    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Fabricates a session for any non-empty credential pair. There is no
    /// credential check anywhere in this design: the token is JWT-shaped
    /// but unsigned, and only exists so requests carry a well-formed
    /// Authorization header. Demo use only.
    pub fn login(&self, username: &str, password: &str) -> Result<User, SessionError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(SessionError::EmptyCredentials);
        }
        let user = User {
            id: format!("user-{}", unix_now()),
            username: username.to_string(),
            role: Role::for_username(username),
        };
        let serialized =
            serde_json::to_vec(&user).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(TOKEN_FILE), mock_jwt(&user))?;
        fs::write(self.dir.join(USER_FILE), serialized)?;
        Ok(user)
    }

    pub fn token(&self) -> Option<String> {
        fs::read_to_string(self.dir.join(TOKEN_FILE))
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn current_user(&self) -> Result<Option<User>, SessionError> {
        let raw = match fs::read(self.dir.join(USER_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| SessionError::Corrupt(e.to_string()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self.current_user(),
            Ok(Some(User {
                role: Role::Admin,
                ..
            }))
        )
    }

    pub fn logout(&self) -> Result<(), SessionError> {
        for name in [TOKEN_FILE, USER_FILE] {
            match fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// header.payload."mock-signature", base64url without padding. Looks like
/// a JWT on the wire; verifies as nothing.
fn mock_jwt(user: &User) -> String {
    let now = unix_now();
    let header = json!({ "alg": "HS256", "typ": "JWT" });
    let payload = json!({
        "sub": user.username,
        "userId": user.id,
        "role": user.role,
        "iat": now,
        "exp": now + 24 * 60 * 60,
    });
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        URL_SAFE_NO_PAD.encode("mock-signature"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::at(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn admin_username_gets_admin_role() {
        let (_dir, store) = store();
        let user = store.login("Admin", "x").unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(store.is_admin());
    }

    #[test]
    fn other_usernames_get_user_role() {
        let (_dir, store) = store();
        let user = store.login("alice", "x").unwrap();
        assert_eq!(user.role, Role::User);
        assert!(!store.is_admin());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.login("", "x"),
            Err(SessionError::EmptyCredentials)
        ));
        assert!(matches!(
            store.login("alice", ""),
            Err(SessionError::EmptyCredentials)
        ));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn logout_clears_the_session() {
        let (_dir, store) = store();
        store.login("alice", "x").unwrap();
        assert!(store.is_authenticated());
        store.logout().unwrap();
        assert!(!store.is_authenticated());
        assert!(store.current_user().unwrap().is_none());
        // a second logout is fine
        store.logout().unwrap();
    }

    #[test]
    fn token_is_jwt_shaped() {
        let (_dir, store) = store();
        store.login("alice", "x").unwrap();
        let token = store.token().unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn login_persists_the_user_record() {
        let (_dir, store) = store();
        store.login("bob", "pw").unwrap();
        let user = store.current_user().unwrap().unwrap();
        assert_eq!(user.username, "bob");
        assert!(user.id.starts_with("user-"));
    }
}
