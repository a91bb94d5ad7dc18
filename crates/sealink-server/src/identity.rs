//! Server identity persistence.
//!
//! The identity keypair is stored as UTF-8 JSON with mode 0600:
//!
//! ```json
//! {"publicKey": [32 bytes], "privateKey": [64 bytes], "createdAt": "..."}
//! ```
//!
//! The file's integrity is trusted; tampering detection is out of scope.
//! The private field is the 64-byte seed-then-public layout, so the loader
//! can verify the halves still agree.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sealink_core::Environment;
use sealink_crypto::IdentityKeyPair;

/// Errors from identity load/save.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Filesystem failure.
    #[error("identity file I/O: {0}")]
    Io(#[from] io::Error),

    /// The file exists but does not parse.
    #[error("identity file malformed: {0}")]
    Malformed(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    public_key: Vec<u8>,
    private_key: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

/// Load the identity at `path`, if the file exists.
pub fn load(path: &Path) -> Result<Option<IdentityKeyPair>, IdentityError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let stored: StoredIdentity = serde_json::from_slice(&contents)
        .map_err(|err| IdentityError::Malformed(err.to_string()))?;

    let private: [u8; 64] = stored
        .private_key
        .try_into()
        .map_err(|_| IdentityError::Malformed("privateKey must be 64 bytes".to_string()))?;

    let identity = IdentityKeyPair::from_keypair_bytes(&private)
        .map_err(|err| IdentityError::Malformed(err.to_string()))?;

    // The stored public key is redundant with the private layout's
    // trailing half; reject files where they disagree.
    if stored.public_key != identity.public().to_bytes() {
        return Err(IdentityError::Malformed(
            "publicKey does not match privateKey".to_string(),
        ));
    }

    Ok(Some(identity))
}

/// Persist `identity` at `path` with mode 0600, creating parent
/// directories as needed.
pub fn save(
    path: &Path,
    identity: &IdentityKeyPair,
    created_at: Option<String>,
) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let stored = StoredIdentity {
        public_key: identity.public().to_bytes().to_vec(),
        private_key: identity.to_keypair_bytes().to_vec(),
        created_at,
    };

    let json = serde_json::to_vec(&stored)
        .map_err(|err| IdentityError::Malformed(err.to_string()))?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Load the identity at `path`, creating and persisting a fresh one if the
/// file does not exist.
pub fn load_or_create<E: Environment>(
    env: &E,
    path: &Path,
) -> Result<IdentityKeyPair, IdentityError> {
    if let Some(identity) = load(path)? {
        return Ok(identity);
    }

    let identity = IdentityKeyPair::from_seed(env.random_array());
    save(path, &identity, Some(env.now_unix_ms().to_string()))?;

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealink_core::env::testing::TestEnv;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server-identity.key");
        let identity = IdentityKeyPair::from_seed([5u8; 32]);

        save(&path, &identity, Some("1700000000000".to_string())).unwrap();
        let loaded = load(&path).unwrap().unwrap();

        assert_eq!(loaded.public(), identity.public());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.key")).unwrap().is_none());
    }

    #[test]
    fn load_or_create_persists_and_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("server-identity.key");
        let env = TestEnv::at(1_700_000_000_000);

        let first = load_or_create(&env, &path).unwrap();
        let second = load_or_create(&env, &path).unwrap();

        assert_eq!(first.public(), second.public());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_read_write_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server-identity.key");
        save(&path, &IdentityKeyPair::from_seed([6u8; 32]), None).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn mismatched_public_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server-identity.key");

        let identity = IdentityKeyPair::from_seed([7u8; 32]);
        let other = IdentityKeyPair::from_seed([8u8; 32]);

        let stored = StoredIdentity {
            public_key: other.public().to_bytes().to_vec(),
            private_key: identity.to_keypair_bytes().to_vec(),
            created_at: None,
        };
        std::fs::write(&path, serde_json::to_vec(&stored).unwrap()).unwrap();

        assert!(matches!(load(&path), Err(IdentityError::Malformed(_))));
    }

    #[test]
    fn wire_format_uses_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server-identity.key");
        save(&path, &IdentityKeyPair::from_seed([9u8; 32]), Some("t".to_string())).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"publicKey\""));
        assert!(text.contains("\"privateKey\""));
        assert!(text.contains("\"createdAt\""));
    }
}
