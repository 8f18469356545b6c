//! Capability snapshot derived from the server handshake.
//!
//! A [`ServerCapabilities`] value is built once per connected session and never
//! mutated afterwards. Lookups always have an answer: flags absent from the
//! handshake fall back to the version threshold, then to "unsupported".

use std::fmt;

use serde_json::{Map, Value};

/// A dotted `major.minor.patch` server version.
///
/// Pre-release and build suffixes (`1.27.0-dev.3`) are ignored for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string leniently.
    ///
    /// Returns `None` when the major component is not numeric. Missing minor or
    /// patch components are treated as zero.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let core = text
            .trim()
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        let mut parts = core.split('.').map(leading_number);
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(part.len(), |(i, _)| i);
    part[..end].parse().ok()
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Optional server features the client knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ClosingLabels,
    GetDeclarations,
    CustomFolding,
    AvailableSuggestions,
    GetSignature,
    CancelAllRequests,
    Shutdown,
}

impl Capability {
    pub const ALL: [Self; 7] = [
        Self::ClosingLabels,
        Self::GetDeclarations,
        Self::CustomFolding,
        Self::AvailableSuggestions,
        Self::GetSignature,
        Self::CancelAllRequests,
        Self::Shutdown,
    ];

    /// Key used for this capability in the handshake's `capabilities` object.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ClosingLabels => "supportsClosingLabels",
            Self::GetDeclarations => "supportsGetDeclarations",
            Self::CustomFolding => "supportsCustomFolding",
            Self::AvailableSuggestions => "supportsAvailableSuggestions",
            Self::GetSignature => "supportsGetSignature",
            Self::CancelAllRequests => "supportsCancelAllRequests",
            Self::Shutdown => "supportsShutdown",
        }
    }

    /// First server version known to support this capability.
    ///
    /// `None` means the server must advertise it explicitly.
    #[must_use]
    pub const fn min_version(self) -> Option<ServerVersion> {
        match self {
            Self::ClosingLabels => Some(ServerVersion::new(1, 18, 4)),
            Self::GetDeclarations => Some(ServerVersion::new(1, 18, 7)),
            Self::CustomFolding => Some(ServerVersion::new(1, 20, 3)),
            Self::AvailableSuggestions => Some(ServerVersion::new(1, 26, 0)),
            Self::GetSignature => Some(ServerVersion::new(1, 27, 5)),
            Self::CancelAllRequests => None,
            Self::Shutdown => Some(ServerVersion::new(1, 0, 0)),
        }
    }
}

/// Immutable feature-flag snapshot for one connected session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerCapabilities {
    version: String,
    parsed_version: Option<ServerVersion>,
    advertised: Map<String, Value>,
}

impl ServerCapabilities {
    /// Build the snapshot from the handshake's version and raw capability payload.
    ///
    /// A payload that is not a JSON object is ignored.
    #[must_use]
    pub fn from_handshake(version: impl Into<String>, payload: Option<&Value>) -> Self {
        let version = version.into();
        let parsed_version = ServerVersion::parse(&version);
        let advertised = payload
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self {
            version,
            parsed_version,
            advertised,
        }
    }

    /// A snapshot that supports nothing. Used before any server has connected.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Version string as reported by the server (empty if unknown).
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn parsed_version(&self) -> Option<ServerVersion> {
        self.parsed_version
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        if let Some(explicit) = self.advertised.get(capability.key()).and_then(Value::as_bool) {
            return explicit;
        }
        match (capability.min_version(), self.parsed_version) {
            (Some(min), Some(version)) => version >= min,
            _ => false,
        }
    }

    /// Arbitrary boolean lookup by handshake key. Absent or non-boolean is `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.advertised
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Arbitrary string lookup by handshake key. Absent or non-string is `""`.
    #[must_use]
    pub fn string(&self, key: &str) -> &str {
        self.advertised
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}
