//! Cloud image references: local paths for an image and its verification artifacts.

use std::path::{Path, PathBuf};

use crate::config::{parse_file_from_url, Environment, ImageDecl};
use crate::error::{LabError, Result};

/// Suffix of sidecar files written after successful verification.
pub const VERIFIED_SUFFIX: &str = ".verified";

/// Default cloud-init network-config schema version.
pub const DEFAULT_NETWORK_VERSION: u8 = 1;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Parse a manifest `checksum_type`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(LabError::ConfigError(format!(
                "Unsupported checksum algorithm {other}"
            ))),
        }
    }
}

/// Which local artifact of an image to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageArtifact {
    Image,
    Checksum,
    ChecksumSignature,
}

/// A declared cloud image resolved to local paths.
#[derive(Debug, Clone)]
pub struct CloudImage {
    pub name: String,

    pub image_url: String,

    pub checksum_url: Option<String>,

    pub checksum_type: Option<String>,

    pub checksum_url_gpg: Option<String>,

    pub network_version: u8,

    pub os_variant: String,

    pub image_dir: PathBuf,

    pub image_path: PathBuf,

    pub checksum_path: Option<PathBuf>,

    pub checksum_gpg_path: Option<PathBuf>,
}

impl CloudImage {
    /// Resolve an image declaration against the environment's image directory.
    pub fn resolve(decl: &ImageDecl, env: &Environment) -> Result<Self> {
        Self::resolve_in(decl, &env.cloud_image_dir())
    }

    /// Resolve an image declaration into `image_dir`.
    pub fn resolve_in(decl: &ImageDecl, image_dir: &Path) -> Result<Self> {
        let filename = parse_file_from_url(&decl.image_url).ok_or_else(|| {
            LabError::ConfigError(format!(
                "Image {} has no file name in its URL: {}",
                decl.name, decl.image_url
            ))
        })?;

        let checksum_path = match &decl.checksum_url {
            Some(url) => {
                let checksum_name = parse_file_from_url(url).ok_or_else(|| {
                    LabError::ConfigError(format!(
                        "Image {} has no file name in its checksum URL: {url}",
                        decl.name
                    ))
                })?;
                // Debian releases publish identically named checksum files.
                let checksum_name = match debian_release(&filename) {
                    Some(release) => format!("{checksum_name}.debian{release}"),
                    None => checksum_name,
                };
                Some(image_dir.join(checksum_name))
            }
            None => None,
        };

        let checksum_gpg_path = decl
            .checksum_url_gpg
            .as_deref()
            .and_then(parse_file_from_url)
            .map(|name| image_dir.join(name));

        let network_version = decl.network_version.unwrap_or(DEFAULT_NETWORK_VERSION);
        if !matches!(network_version, 1 | 2) {
            return Err(LabError::ConfigError(format!(
                "Image {} has unsupported network_version {network_version}",
                decl.name
            )));
        }

        Ok(Self {
            name: decl.name.clone(),
            image_url: decl.image_url.clone(),
            checksum_url: decl.checksum_url.clone(),
            checksum_type: decl.checksum_type.clone(),
            checksum_url_gpg: decl.checksum_url_gpg.clone(),
            network_version,
            os_variant: decl.os_variant.clone().unwrap_or_else(|| decl.name.clone()),
            image_dir: image_dir.to_path_buf(),
            image_path: image_dir.join(filename),
            checksum_path,
            checksum_gpg_path,
        })
    }

    /// Local path of an artifact, if the image declares it.
    pub fn artifact_path(&self, artifact: ImageArtifact) -> Option<&Path> {
        match artifact {
            ImageArtifact::Image => Some(&self.image_path),
            ImageArtifact::Checksum => self.checksum_path.as_deref(),
            ImageArtifact::ChecksumSignature => self.checksum_gpg_path.as_deref(),
        }
    }

    /// Whether an artifact is present on local disk.
    pub fn exists_locally(&self, artifact: ImageArtifact) -> bool {
        self.artifact_path(artifact).is_some_and(Path::exists)
    }

    /// Configured checksum algorithm.
    pub fn checksum_algorithm(&self) -> Result<ChecksumAlgorithm> {
        let value = self.checksum_type.as_deref().ok_or_else(|| {
            LabError::ConfigError(format!(
                "Image {} sets checksum_url without checksum_type",
                self.name
            ))
        })?;
        ChecksumAlgorithm::parse(value)
    }

    /// Marker written next to the image once its checksum matched.
    pub fn verified_marker_path(&self) -> PathBuf {
        with_suffix(&self.image_path, VERIFIED_SUFFIX)
    }

    /// Signature-verified copy of the checksum file.
    pub fn verified_checksum_path(&self) -> Option<PathBuf> {
        self.checksum_path
            .as_deref()
            .map(|p| with_suffix(p, VERIFIED_SUFFIX))
    }

    /// Present locally and, when a checksum is configured, verified.
    pub fn is_trusted(&self) -> bool {
        self.image_path.is_file()
            && (self.checksum_url.is_none() || self.verified_marker_path().is_file())
    }

    /// Path of the image if it can be used as a backing file.
    pub fn require_trusted(&self) -> Result<&Path> {
        if !self.image_path.is_file() {
            return Err(LabError::ImageError {
                image: self.name.clone(),
                message: format!(
                    "not present at {}; run `lvlab init` first",
                    self.image_path.display()
                ),
            });
        }
        if !self.is_trusted() {
            return Err(LabError::ImageError {
                image: self.name.clone(),
                message: "checksum has not been verified; run `lvlab init` first".to_string(),
            });
        }
        Ok(&self.image_path)
    }
}

/// Append a suffix to the full file name (`a.qcow2` → `a.qcow2.verified`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn debian_release(filename: &str) -> Option<String> {
    let lower = filename.to_ascii_lowercase();
    let start = lower.find("debian-")? + "debian-".len();
    let release: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if release.is_empty() {
        None
    } else {
        Some(release)
    }
}
