//! Tenant namespace guard
//!
//! Every organization's objects live under `{namespace}/` in one shared
//! bucket. Keys enter the core only through [`TenantNamespace::qualify`] and
//! leave it only through [`TenantNamespace::relativize`], so a tenant never
//! names, and never sees, another tenant's prefix.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace guard errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Key '{0}' lies outside the caller's namespace")]
    ForeignKey(String),

    #[error("Role '{0}' may not modify objects")]
    AuthorizationDenied(Role),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Caller role as supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Read,
    Write,
    Superadmin,
    Owner,
}

impl Role {
    /// Whether this role may initiate, authorize, complete or abort uploads
    pub fn can_write(self) -> bool {
        !matches!(self, Role::Read)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
            Role::Superadmin => "superadmin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Role::Read),
            "write" => Ok(Role::Write),
            "superadmin" => Ok(Role::Superadmin),
            "owner" => Ok(Role::Owner),
            other => Err(NamespaceError::UnknownRole(other.to_string())),
        }
    }
}

/// An organization's key prefix within the shared bucket
///
/// Namespaces are opaque identifiers (the organization UUID in practice) and
/// never contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantNamespace(String);

impl TenantNamespace {
    pub fn new(namespace: impl Into<String>) -> Result<Self, NamespaceError> {
        let namespace = namespace.into();

        if namespace.is_empty() {
            return Err(NamespaceError::InvalidNamespace(
                "namespace cannot be empty".into(),
            ));
        }

        if namespace == "." || namespace == ".." {
            return Err(NamespaceError::InvalidNamespace(format!(
                "'{}' is not a valid namespace",
                namespace
            )));
        }

        if namespace
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control() || c.is_whitespace())
        {
            return Err(NamespaceError::InvalidNamespace(format!(
                "'{}' contains a separator, whitespace or control character",
                namespace
            )));
        }

        Ok(Self(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace's root prefix, `{namespace}/`
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }

    /// Turn a tenant-relative path into a fully qualified storage key.
    ///
    /// The empty path qualifies to the namespace root. Paths are rejected when
    /// they are absolute, contain `.`/`..`/empty interior segments or
    /// backslashes, or already begin with the namespace segment.
    pub fn qualify(&self, relative_path: &str) -> Result<QualifiedKey, NamespaceError> {
        validate_relative_path(relative_path, self)?;
        Ok(QualifiedKey {
            key: format!("{}/{}", self.0, relative_path),
            relative_len: relative_path.len(),
        })
    }

    /// Strip the namespace prefix from a storage key.
    ///
    /// Only a leading `{namespace}/` is removed; keys outside the namespace are
    /// an error rather than being passed through.
    pub fn relativize(&self, key: &str) -> Result<String, NamespaceError> {
        key.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
            .ok_or_else(|| NamespaceError::ForeignKey(key.to_string()))
    }

    /// Whether a storage key lies under this namespace
    pub fn owns(&self, key: &str) -> bool {
        self.relativize(key).is_ok()
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_relative_path(path: &str, namespace: &TenantNamespace) -> Result<(), NamespaceError> {
    let invalid = |reason: &str| NamespaceError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Ok(());
    }

    if path.starts_with('/') {
        return Err(invalid("absolute paths are not accepted"));
    }

    if path.contains('\\') || path.chars().any(char::is_control) {
        return Err(invalid("backslashes and control characters are not allowed"));
    }

    // A trailing '/' denotes a folder, so the last segment may be empty.
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    for segment in trimmed.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("relative segments are not allowed")),
            _ => {}
        }
    }

    if trimmed.split('/').next() == Some(namespace.as_str()) {
        return Err(invalid("path must be relative to the caller's namespace"));
    }

    Ok(())
}

/// Qualify `relative_path` under `namespace`.
pub fn qualify(relative_path: &str, namespace: &TenantNamespace) -> Result<String, NamespaceError> {
    namespace.qualify(relative_path).map(QualifiedKey::into_string)
}

/// Relativize `key` against `namespace`.
pub fn relativize(key: &str, namespace: &TenantNamespace) -> Result<String, NamespaceError> {
    namespace.relativize(key)
}

/// A storage key known to be rooted under a tenant namespace
///
/// Only [`TenantNamespace::qualify`] constructs one, so gateway calls can never
/// be handed a caller-supplied absolute key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedKey {
    key: String,
    relative_len: usize,
}

impl QualifiedKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The tenant-relative part of the key
    pub fn relative(&self) -> &str {
        &self.key[self.key.len() - self.relative_len..]
    }

    /// Whether the key names the namespace root or a folder
    pub fn is_folder(&self) -> bool {
        self.relative_len == 0 || self.key.ends_with('/')
    }

    pub fn into_string(self) -> String {
        self.key
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for QualifiedKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

/// The identity of whoever is driving a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    namespace: TenantNamespace,
    role: Role,
}

impl Caller {
    pub fn new(namespace: TenantNamespace, role: Role) -> Self {
        Self { namespace, role }
    }

    pub fn namespace(&self) -> &TenantNamespace {
        &self.namespace
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Fail with `AuthorizationDenied` unless the caller may write
    pub fn require_write(&self) -> Result<(), NamespaceError> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(NamespaceError::AuthorizationDenied(self.role))
        }
    }
}

/// One entry returned by the listing collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_folder: bool,
}

impl ListedObject {
    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            is_folder: true,
        }
    }

    pub fn file(key: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            is_folder: false,
        }
    }
}

/// Post-process raw listing results for display to a tenant.
///
/// Keys are made relative to the namespace; anything outside it is dropped
/// and logged, never exposed.
pub fn relativize_listing(namespace: &TenantNamespace, objects: Vec<ListedObject>) -> Vec<ListedObject> {
    objects
        .into_iter()
        .filter_map(|mut object| match namespace.relativize(&object.key) {
            Ok(relative) => {
                object.key = relative;
                Some(object)
            }
            Err(_) => {
                tracing::warn!(
                    namespace = %namespace,
                    key = %object.key,
                    "Dropping listing entry outside caller namespace"
                );
                None
            }
        })
        .collect()
}
