//! Narinfo parsing and formatting for Nix substituter compatibility.

use crate::hash::NarHash;
use crate::store_path::StorePath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A narinfo file content describing one NAR.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NarInfo {
    /// The store path this narinfo describes.
    pub store_path: StorePath,
    /// URL to download the NAR (relative path).
    pub url: String,
    /// Compression type of the downloadable file.
    pub compression: Compression,
    /// Hash of the (possibly compressed) file.
    pub file_hash: NarHash,
    /// Size of the (possibly compressed) file.
    pub file_size: u64,
    /// Hash of the uncompressed NAR.
    pub nar_hash: NarHash,
    /// Size of the uncompressed NAR.
    pub nar_size: u64,
    /// References to other store paths.
    pub references: Vec<StorePath>,
    /// Optional deriver store path.
    pub deriver: Option<StorePath>,
    /// Signatures.
    pub signatures: Vec<Signature>,
}

impl NarInfo {
    /// Create a narinfo for an uncompressed NAR.
    pub fn new_uncompressed(store_path: StorePath, nar_hash: NarHash, nar_size: u64) -> Self {
        let url = format!("nar/{}.nar", store_path.hash());
        Self {
            store_path,
            url,
            compression: Compression::None,
            file_hash: nar_hash.clone(),
            file_size: nar_size,
            nar_hash,
            nar_size,
            references: Vec::new(),
            deriver: None,
            signatures: Vec::new(),
        }
    }

    /// Format as standard narinfo text.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("StorePath: {}", self.store_path));
        lines.push(format!("URL: {}", self.url));
        lines.push(format!("Compression: {}", self.compression));
        lines.push(format!("FileHash: {}", self.file_hash.to_sri()));
        lines.push(format!("FileSize: {}", self.file_size));
        lines.push(format!("NarHash: {}", self.nar_hash.to_sri()));
        lines.push(format!("NarSize: {}", self.nar_size));

        if !self.references.is_empty() {
            let refs: Vec<_> = self.references.iter().map(|r| r.basename()).collect();
            lines.push(format!("References: {}", refs.join(" ")));
        }

        if let Some(ref deriver) = self.deriver {
            lines.push(format!("Deriver: {}", deriver.basename()));
        }

        for sig in &self.signatures {
            lines.push(format!("Sig: {sig}"));
        }

        lines.join("\n") + "\n"
    }

    /// Parse from narinfo text format.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let mut store_path: Option<StorePath> = None;
        let mut url: Option<String> = None;
        let mut compression = Compression::None;
        let mut file_hash: Option<NarHash> = None;
        let mut file_size: Option<u64> = None;
        let mut nar_hash: Option<NarHash> = None;
        let mut nar_size: Option<u64> = None;
        let mut references = Vec::new();
        let mut deriver: Option<StorePath> = None;
        let mut signatures = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| crate::Error::NarInfoParse(format!("invalid line: {line}")))?;

            match key {
                "StorePath" => store_path = Some(StorePath::parse(value)?),
                "URL" => url = Some(value.to_string()),
                "Compression" => compression = Compression::parse(value)?,
                "FileHash" => file_hash = Some(NarHash::from_sri(value)?),
                "FileSize" => {
                    file_size = Some(value.parse().map_err(|e| {
                        crate::Error::NarInfoParse(format!("invalid FileSize: {e}"))
                    })?)
                }
                "NarHash" => nar_hash = Some(NarHash::from_sri(value)?),
                "NarSize" => {
                    nar_size = Some(value.parse().map_err(|e| {
                        crate::Error::NarInfoParse(format!("invalid NarSize: {e}"))
                    })?)
                }
                "References" => {
                    for r in value.split_whitespace() {
                        references.push(StorePath::from_basename(r).map_err(|e| {
                            crate::Error::NarInfoParse(format!("invalid reference '{r}': {e}"))
                        })?);
                    }
                }
                "Deriver" => {
                    deriver = Some(StorePath::from_basename(value).map_err(|e| {
                        crate::Error::NarInfoParse(format!("invalid deriver '{value}': {e}"))
                    })?);
                }
                "Sig" => signatures.push(Signature::parse(value)?),
                _ => {} // Ignore unknown fields
            }
        }

        Ok(Self {
            store_path: store_path
                .ok_or_else(|| crate::Error::NarInfoParse("missing StorePath".to_string()))?,
            url: url.ok_or_else(|| crate::Error::NarInfoParse("missing URL".to_string()))?,
            compression,
            file_hash: file_hash
                .ok_or_else(|| crate::Error::NarInfoParse("missing FileHash".to_string()))?,
            file_size: file_size
                .ok_or_else(|| crate::Error::NarInfoParse("missing FileSize".to_string()))?,
            nar_hash: nar_hash
                .ok_or_else(|| crate::Error::NarInfoParse("missing NarHash".to_string()))?,
            nar_size: nar_size
                .ok_or_else(|| crate::Error::NarInfoParse("missing NarSize".to_string()))?,
            references,
            deriver,
            signatures,
        })
    }
}

/// Compression type for NAR files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Xz,
    Zstd,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "xz" => Ok(Self::Xz),
            "zstd" => Ok(Self::Zstd),
            "gzip" | "gz" => Ok(Self::Gzip),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            _ => Err(crate::Error::NarInfoParse(format!(
                "unknown compression: {s}"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Xz => write!(f, "xz"),
            Self::Zstd => write!(f, "zstd"),
            Self::Gzip => write!(f, "gzip"),
            Self::Bzip2 => write!(f, "bzip2"),
        }
    }
}

/// A narinfo signature in `keyname:base64` form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Key name (e.g., "cache.example.com-1").
    pub key_name: String,
    /// Base64-encoded signature bytes.
    pub signature: String,
}

impl Signature {
    /// Parse from "keyname:signature" format.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (key_name, signature) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::NarInfoParse(format!("invalid signature format: {s}")))?;
        Ok(Self {
            key_name: key_name.to_string(),
            signature: signature.to_string(),
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_name, self.signature)
    }
}
