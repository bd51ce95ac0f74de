//! Manifests, on-wire state formats, and conversion between them.
//!
//! The manifest is the small document a log stores next to its state
//! document to say how that state is encoded. Every process has a preferred
//! manifest; at startup the driver reconciles it with the stored one (see
//! [`crate::driver`]).

use std::fmt;

use bosk_tree::Node;
use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Manifest layout version understood by this crate. A stored manifest with
/// any other version has no upgrade path.
pub const MANIFEST_VERSION: u32 = 1;

/// Encoding of the persisted state document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFormat {
    /// Human-readable; the default.
    Json,
    /// Compact binary.
    Bincode,
}

impl Default for StateFormat {
    fn default() -> Self {
        Self::Json
    }
}

impl fmt::Display for StateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFormat::Json => write!(f, "json"),
            StateFormat::Bincode => write!(f, "bincode"),
        }
    }
}

impl StateFormat {
    pub fn encode(&self, root: &Node) -> LogResult<Vec<u8>> {
        Ok(match self {
            StateFormat::Json => serde_json::to_vec(root)?,
            StateFormat::Bincode => bincode::serialize(root)?,
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> LogResult<Node> {
        Ok(match self {
            StateFormat::Json => serde_json::from_slice(bytes)?,
            StateFormat::Bincode => bincode::deserialize(bytes)?,
        })
    }
}

/// Describes how a log's persisted state is laid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub format: StateFormat,
}

impl Manifest {
    /// The current manifest version with the given state format.
    pub fn new(format: StateFormat) -> Self {
        Self {
            version: MANIFEST_VERSION,
            format,
        }
    }
}

/// A snapshot of the whole tree as of a log position.
///
/// `position` is the sequence number of the first record *not* folded into
/// `bytes`. `revision` increases by one with every replacement and is what
/// compare-and-swap writes check. The document carries its own format so
/// a reader never decodes it with the wrong one, even mid-upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    pub revision: u64,
    pub position: u64,
    pub format: StateFormat,
    pub bytes: Vec<u8>,
}

impl StateDocument {
    pub fn encode(root: &Node, format: StateFormat, revision: u64, position: u64) -> LogResult<Self> {
        Ok(Self {
            revision,
            position,
            format,
            bytes: format.encode(root)?,
        })
    }

    pub fn decode(&self) -> LogResult<Node> {
        self.format.decode(&self.bytes)
    }
}

/// Converts state documents between a stored format and a preferred one.
#[derive(Clone, Debug)]
pub struct FormatUpgrader {
    preferred: Manifest,
}

impl FormatUpgrader {
    pub fn new(preferred: Manifest) -> Self {
        Self { preferred }
    }

    pub fn preferred(&self) -> &Manifest {
        &self.preferred
    }

    /// Whether `stored` can be converted to the preferred manifest.
    pub fn can_upgrade(&self, stored: &Manifest) -> bool {
        stored.version == self.preferred.version
    }

    /// Re-encode `doc` in the preferred format. The revision is bumped so
    /// concurrent compare-and-swap writers notice.
    pub fn upgrade_from(&self, stored: &Manifest, doc: &StateDocument) -> LogResult<StateDocument> {
        self.check(stored)?;
        self.convert(doc, self.preferred.format)
    }

    /// Re-encode a preferred-format `doc` back into `target`'s format.
    pub fn downgrade_from(&self, target: &Manifest, doc: &StateDocument) -> LogResult<StateDocument> {
        self.check(target)?;
        self.convert(doc, target.format)
    }

    fn check(&self, other: &Manifest) -> LogResult<()> {
        if self.can_upgrade(other) {
            Ok(())
        } else {
            Err(LogError::ManifestMismatch {
                stored: other.clone(),
                preferred: self.preferred.clone(),
            })
        }
    }

    fn convert(&self, doc: &StateDocument, format: StateFormat) -> LogResult<StateDocument> {
        let root = doc.decode()?;
        StateDocument::encode(&root, format, doc.revision + 1, doc.position)
    }
}
