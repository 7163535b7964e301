// Copyright 2020 Joyent, Inc.

//! Bearer credential storage.
//!
//! The transport only ever reads the token and attaches it to outgoing
//! requests. Login and logout flows elsewhere in the application call
//! `set` and `clear`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// A token together with the identity it was issued for.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Credentials {
    pub token: String,
    #[serde(rename = "user")]
    pub identity: Value,
}

impl Credentials {
    pub fn new<S: Into<String>>(token: S, identity: Value) -> Credentials {
        Credentials {
            token: token.into(),
            identity,
        }
    }
}

pub trait TokenStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn identity(&self) -> Option<Value>;
    fn set(&self, credentials: Credentials) -> Result<(), TransportError>;
    fn clear(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    current: RwLock<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> MemoryTokenStore {
        MemoryTokenStore::default()
    }

    pub fn with_credentials(credentials: Credentials) -> MemoryTokenStore {
        MemoryTokenStore {
            current: RwLock::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        read(&self.current).map(|c| c.token)
    }

    fn identity(&self) -> Option<Value> {
        read(&self.current).map(|c| c.identity)
    }

    fn set(&self, credentials: Credentials) -> Result<(), TransportError> {
        write(&self.current, Some(credentials));
        Ok(())
    }

    fn clear(&self) -> Result<(), TransportError> {
        write(&self.current, None);
        Ok(())
    }
}

/// Credentials persisted as a small JSON document with `token` and `user`
/// keys, so a session survives process restarts.
pub struct FileTokenStore {
    path: PathBuf,
    current: RwLock<Option<Credentials>>,
}

impl FileTokenStore {
    /// Load whatever is stored at `path`. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileTokenStore, TransportError> {
        let path = path.as_ref().to_path_buf();
        let current = match fs::read(&path) {
            Ok(bytes) => Some(serde_json::from_slice(&bytes)?),
            Err(ref e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(FileTokenStore {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Option<String> {
        read(&self.current).map(|c| c.token)
    }

    fn identity(&self) -> Option<Value> {
        read(&self.current).map(|c| c.identity)
    }

    fn set(&self, credentials: Credentials) -> Result<(), TransportError> {
        let encoded = serde_json::to_vec_pretty(&credentials)?;
        fs::write(&self.path, encoded)?;
        write(&self.current, Some(credentials));
        Ok(())
    }

    fn clear(&self) -> Result<(), TransportError> {
        match fs::remove_file(&self.path) {
            Ok(()) => (),
            Err(ref e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => return Err(e.into()),
        }
        write(&self.current, None);
        Ok(())
    }
}

fn read(slot: &RwLock<Option<Credentials>>) -> Option<Credentials> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write(slot: &RwLock<Option<Credentials>>, value: Option<Credentials>) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}
