//! Cloud image acquisition and verification (`lvlab init`).
//!
//! Downloads missing artifacts, checks the signed checksum file with `gpg`
//! when a keyring is configured, then hashes the image. Each successful step
//! leaves a `.verified` sidecar; the downloaded files are never modified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use lvlab_core::error::{LabError, Result};
use lvlab_core::image::{with_suffix, ChecksumAlgorithm, CloudImage, ImageArtifact};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::process::{args, CommandRunner};

/// OpenPGP tool used to check signed checksum files.
pub const GPG: &str = "gpg";

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// What `acquire` did for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireReport {
    pub downloaded: Vec<PathBuf>,
    pub signature_verified: bool,
    pub checksum_verified: bool,
    /// The image already carried a verification marker
    pub already_verified: bool,
}

/// Downloads and verifies cloud images.
pub struct ImageAcquirer<'a> {
    client: reqwest::Client,
    runner: &'a dyn CommandRunner,
}

impl<'a> ImageAcquirer<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            client: reqwest::Client::new(),
            runner,
        }
    }

    /// Make `image` present and trusted.
    pub async fn acquire(&self, image: &CloudImage) -> Result<AcquireReport> {
        let mut report = AcquireReport::default();

        tokio::fs::create_dir_all(&image.image_dir).await?;

        let wanted = [
            (ImageArtifact::Image, Some(image.image_url.as_str())),
            (ImageArtifact::Checksum, image.checksum_url.as_deref()),
            (ImageArtifact::ChecksumSignature, image.checksum_url_gpg.as_deref()),
        ];
        for (artifact, url) in wanted {
            let (Some(url), Some(dest)) = (url, image.artifact_path(artifact)) else {
                continue;
            };
            if dest.exists() {
                tracing::debug!(image = %image.name, path = %dest.display(), "Already downloaded");
                continue;
            }
            download_file(&self.client, url, dest).await?;
            report.downloaded.push(dest.to_path_buf());
        }

        if image.checksum_url.is_none() {
            tracing::info!(image = %image.name, "No checksum configured, image used as-is");
            return Ok(report);
        }

        if image.verified_marker_path().is_file() && report.downloaded.is_empty() {
            report.already_verified = true;
            return Ok(report);
        }

        if image.checksum_gpg_path.is_some() {
            self.verify_signature(image).await?;
            report.signature_verified = true;
        }

        verify_checksum(image).await?;
        report.checksum_verified = true;

        Ok(report)
    }

    /// Check the checksum file's signature, writing its verified content
    /// to `{checksum}.verified`.
    pub async fn verify_signature(&self, image: &CloudImage) -> Result<()> {
        let (Some(checksum), Some(keyfile), Some(verified)) = (
            image.checksum_path.as_deref(),
            image.checksum_gpg_path.as_deref(),
            image.verified_checksum_path(),
        ) else {
            return Ok(());
        };

        let keyring = keyring_path(image);
        tracing::info!(image = %image.name, checksum = %checksum.display(), "Verifying checksum signature");

        for argv in gpg_args(&keyring, keyfile, checksum, &verified) {
            self.runner
                .run(GPG, &argv)
                .await
                .map_err(|e| LabError::ImageError {
                    image: image.name.clone(),
                    message: format!("signature verification failed: {e}"),
                })?;
        }

        Ok(())
    }
}

/// Private keyring holding an image's signing keys.
fn keyring_path(image: &CloudImage) -> PathBuf {
    image.image_dir.join(format!("{}.keyring.gpg", image.name))
}

/// `gpg` invocations: import the keys, then decrypt the clearsigned file.
pub fn gpg_args(keyring: &Path, keyfile: &Path, checksum: &Path, output: &Path) -> [Vec<String>; 2] {
    let keyring = keyring.display().to_string();
    let base = args(["--batch", "--no-default-keyring", "--keyring", keyring.as_str()]);

    let mut import = base.clone();
    import.extend(args(["--import".to_string(), keyfile.display().to_string()]));

    let mut decrypt = base;
    decrypt.extend(args([
        "--yes".to_string(),
        "--output".to_string(),
        output.display().to_string(),
        "--decrypt".to_string(),
        checksum.display().to_string(),
    ]));

    [import, decrypt]
}

/// Stream `url` to `dest` via a `.part` file.
pub async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    tracing::info!(url, dest = %dest.display(), "Downloading");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LabError::DownloadError {
            url: url.to_string(),
            status_code: 0,
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(LabError::DownloadError {
            url: url.to_string(),
            status_code: response.status().as_u16(),
            message: "Download failed".to_string(),
        });
    }

    let total_size = response.content_length();
    let part = with_suffix(dest, ".part");
    let mut file = tokio::fs::File::create(&part).await?;
    let mut downloaded: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| LabError::DownloadError {
            url: url.to_string(),
            status_code: 0,
            message: e.to_string(),
        })?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if let Some(total) = total_size {
        if total != 0 && total != downloaded {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(LabError::DownloadError {
                url: url.to_string(),
                status_code: 0,
                message: format!("received {downloaded} of {total} bytes"),
            });
        }
    }

    tokio::fs::rename(&part, dest).await?;
    tracing::debug!(bytes = downloaded, dest = %dest.display(), "Downloaded");
    Ok(())
}

/// Parse a checksum file into `filename → hex digest`.
///
/// Understands BSD-style (`SHA256 (file) = hex`, as published by Fedora) and
/// coreutils-style (`hex  file` or `hex *file`) lines; anything else is
/// skipped, including signature armor.
pub fn parse_checksum_file(content: &str) -> HashMap<String, String> {
    let mut checksums = HashMap::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with("-----") {
            continue;
        }

        if let Some((head, digest)) = line.split_once(") = ") {
            if let Some((algo, file)) = head.split_once(" (") {
                if algo.starts_with("SHA") {
                    checksums.insert(file.to_string(), digest.trim().to_ascii_lowercase());
                    continue;
                }
            }
        }

        let mut parts = line.split_whitespace();
        if let (Some(digest), Some(file), None) = (parts.next(), parts.next(), parts.next()) {
            if digest.chars().all(|c| c.is_ascii_hexdigit()) {
                let file = file.strip_prefix('*').unwrap_or(file);
                checksums.insert(file.to_string(), digest.to_ascii_lowercase());
            }
        }
    }

    checksums
}

/// Hex digest of a file.
pub async fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path).await,
        ChecksumAlgorithm::Sha512 => hash_file::<Sha512>(path).await,
    }
}

async fn hash_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut hasher = D::new();
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare the image against its checksum file and write the marker on match.
///
/// The signature-verified copy of the checksum file is preferred.
pub async fn verify_checksum(image: &CloudImage) -> Result<()> {
    let algorithm = image.checksum_algorithm()?;
    let Some(checksum_path) = image.checksum_path.as_deref() else {
        return Ok(());
    };

    let source = match image.verified_checksum_path() {
        Some(verified) if verified.is_file() => verified,
        _ => checksum_path.to_path_buf(),
    };

    let content = tokio::fs::read_to_string(&source)
        .await
        .map_err(|e| LabError::ImageError {
            image: image.name.clone(),
            message: format!("cannot read checksum file {}: {e}", source.display()),
        })?;

    let filename = image
        .image_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let checksums = parse_checksum_file(&content);
    let expected = checksums.get(&filename).ok_or_else(|| LabError::ImageError {
        image: image.name.clone(),
        message: format!("{} lists no checksum for {filename}", source.display()),
    })?;

    tracing::info!(image = %image.name, ?algorithm, "Verifying image checksum");
    let actual = file_digest(&image.image_path, algorithm).await?;

    let marker = image.verified_marker_path();
    if &actual != expected {
        let _ = tokio::fs::remove_file(&marker).await;
        return Err(LabError::ImageError {
            image: image.name.clone(),
            message: format!("checksum mismatch: expected {expected}, got {actual}"),
        });
    }

    tokio::fs::write(&marker, format!("{actual}\n")).await?;
    tracing::info!(image = %image.name, "Image verified");
    Ok(())
}
