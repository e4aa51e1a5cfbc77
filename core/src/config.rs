//! Manifest model (`Lvlab.yml`) and environment resolution.
//!
//! The manifest mirrors the on-disk YAML: every field is optional where the
//! merge model supplies a default, so the raw declarations stay faithful to
//! what the user wrote and precedence is applied in one place
//! ([`crate::machine::MachineSpec::resolve`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{LabError, Result};

/// Manifest file looked up in the working directory when none is given.
pub const DEFAULT_MANIFEST: &str = "Lvlab.yml";

/// Hypervisor endpoint used when the environment does not name one.
pub const DEFAULT_LIBVIRT_URI: &str = "qemu:///system";

/// Base directory for cloud images and machine disks.
pub const DEFAULT_IMAGE_BASEDIR: &str = "/var/lib/libvirt/images/lvlab";

/// Parsed manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Declared environments; only the first one is managed
    #[serde(default)]
    pub environment: Vec<EnvironmentDecl>,

    /// Cloud images machines can be built from
    #[serde(default)]
    pub images: Vec<ImageDecl>,
}

/// Environment declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentDecl {
    /// Environment name, part of every disk path
    pub name: Option<String>,

    /// Hypervisor connection URI
    pub libvirt_uri: Option<String>,

    /// Defaults applied to every machine
    #[serde(default)]
    pub config_defaults: ConfigDefaults,

    /// Declared machines
    #[serde(default)]
    pub machines: Vec<MachineDecl>,
}

/// Environment-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDefaults {
    /// DNS domain appended to hostnames
    pub domain: Option<String>,

    /// Default image name
    pub os: Option<String>,

    /// Default vCPU count
    pub cpu: Option<u32>,

    /// Default memory in MiB
    pub memory: Option<u32>,

    /// Where cloud images are stored (`cloud-images/` is appended)
    pub cloud_image_basedir: Option<String>,

    /// Where machine disks and boot artifacts are stored
    pub disk_image_basedir: Option<String>,

    /// Field defaults for every declared interface
    #[serde(default)]
    pub interfaces: InterfaceDecl,

    /// Disk defaults, matched to declared disks by name
    #[serde(default)]
    pub disks: Vec<DiskDecl>,

    /// cloud-init defaults
    #[serde(default)]
    pub cloud_init: CloudInitDecl,

    /// Host directories shared into every guest
    #[serde(default)]
    pub mounts: Vec<MountDecl>,
}

/// Network interface declaration (also used as the defaults layer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDecl {
    /// Guest device name
    pub name: Option<String>,

    /// libvirt network to attach to
    pub network: Option<String>,

    /// Static IPv4 address in CIDR form; absent means DHCP
    pub ip4: Option<String>,

    /// IPv4 gateway
    pub ip4gw: Option<String>,

    /// DNS configuration
    pub nameservers: Option<NameserversDecl>,
}

impl InterfaceDecl {
    /// Overlay `declared` on top of `self`, field by field. Declared wins.
    pub fn overlay(&self, declared: &InterfaceDecl) -> InterfaceDecl {
        InterfaceDecl {
            name: declared.name.clone().or_else(|| self.name.clone()),
            network: declared.network.clone().or_else(|| self.network.clone()),
            ip4: declared.ip4.clone().or_else(|| self.ip4.clone()),
            ip4gw: declared.ip4gw.clone().or_else(|| self.ip4gw.clone()),
            nameservers: declared
                .nameservers
                .clone()
                .or_else(|| self.nameservers.clone()),
        }
    }
}

/// DNS servers and search domains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameserversDecl {
    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub search: Vec<String>,
}

/// Disk declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskDecl {
    /// Logical disk name, used to match defaults
    pub name: String,

    /// Size accepted by `qemu-img` (e.g. `20G`)
    pub size: Option<String>,
}

/// cloud-init customization block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInitDecl {
    /// Login user created in the guest
    pub user: Option<String>,

    /// SSH public key, or a path to one
    pub pubkey: Option<String>,

    /// Guest timezone
    pub timezone: Option<String>,

    /// Packages installed on first boot
    pub packages: Option<Vec<String>>,

    /// Commands run on first boot
    pub runcmd: Option<Vec<String>>,
}

impl CloudInitDecl {
    /// Overlay `declared` on top of `self`, field by field. Declared wins.
    pub fn overlay(&self, declared: &CloudInitDecl) -> CloudInitDecl {
        CloudInitDecl {
            user: declared.user.clone().or_else(|| self.user.clone()),
            pubkey: declared.pubkey.clone().or_else(|| self.pubkey.clone()),
            timezone: declared.timezone.clone().or_else(|| self.timezone.clone()),
            packages: declared.packages.clone().or_else(|| self.packages.clone()),
            runcmd: declared.runcmd.clone().or_else(|| self.runcmd.clone()),
        }
    }
}

/// Host directory shared into guests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountDecl {
    /// Host path
    pub source: String,

    /// Mount tag seen by the guest
    pub target: String,

    #[serde(default)]
    pub readonly: bool,
}

/// Machine declaration, before defaults are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineDecl {
    /// Hypervisor-visible domain name
    pub vm_name: Option<String>,

    pub hostname: Option<String>,

    pub fqdn: Option<String>,

    /// Image name
    pub os: Option<String>,

    pub cpu: Option<u32>,

    /// Memory in MiB
    pub memory: Option<u32>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceDecl>,

    #[serde(default)]
    pub disks: Vec<DiskDecl>,

    pub cloud_init: Option<CloudInitDecl>,
}

/// Cloud image declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDecl {
    pub name: String,

    pub image_url: String,

    pub checksum_url: Option<String>,

    /// `sha256` or `sha512`
    pub checksum_type: Option<String>,

    /// Keyring used to verify the signed checksum file
    pub checksum_url_gpg: Option<String>,

    /// cloud-init network-config schema version (1 or 2)
    pub network_version: Option<u8>,

    /// `virt-install --os-variant` value; defaults to the image name
    pub os_variant: Option<String>,
}

impl Manifest {
    /// Load a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(LabError::ConfigError(format!(
                "Manifest not found: {}",
                path.display()
            )));
        }

        let data = std::fs::read_to_string(path)?;
        let manifest = Self::from_yaml(&data).map_err(|e| {
            LabError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            environments = manifest.environment.len(),
            images = manifest.images.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Parse a manifest from a YAML string.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(data)?;
        Ok(manifest)
    }

    /// The managed environment declaration.
    pub fn environment_decl(&self) -> Result<&EnvironmentDecl> {
        self.environment
            .first()
            .ok_or_else(|| LabError::ConfigError("Manifest declares no environment".to_string()))
    }

    /// Resolve the managed environment.
    pub fn environment(&self) -> Result<Environment> {
        Environment::from_decl(self.environment_decl()?)
    }

    /// Declared machines of the managed environment.
    pub fn machines(&self) -> &[MachineDecl] {
        self.environment
            .first()
            .map(|env| env.machines.as_slice())
            .unwrap_or_default()
    }

    /// Find a machine declaration by vm name, falling back to hostname.
    ///
    /// A vm name match anywhere in the manifest wins over a hostname match.
    pub fn find_machine(&self, name: &str) -> Result<&MachineDecl> {
        let machines = self.machines();
        machines
            .iter()
            .find(|m| m.vm_name.as_deref() == Some(name))
            .or_else(|| machines.iter().find(|m| m.hostname.as_deref() == Some(name)))
            .ok_or_else(|| LabError::MachineNotFound(name.to_string()))
    }

    /// Find an image declaration by name.
    pub fn find_image(&self, name: &str) -> Option<&ImageDecl> {
        self.images.iter().find(|img| img.name == name)
    }
}

/// Resolved environment: immutable for the run.
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,

    /// Hypervisor connection URI
    pub uri: String,

    /// DNS domain suffix
    pub domain: Option<String>,

    /// Raw defaults layer for the merge model
    pub defaults: ConfigDefaults,

    /// Base directory for machine disks
    pub disk_image_basedir: PathBuf,

    /// Base directory for cloud images
    pub cloud_image_basedir: PathBuf,
}

impl Environment {
    /// Resolve an environment declaration.
    pub fn from_decl(decl: &EnvironmentDecl) -> Result<Self> {
        let name = decl
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| LabError::ConfigError("Environment has no name".to_string()))?;

        // vm_name is the domain name and the work dir name
        let mut seen = HashSet::new();
        for vm_name in decl.machines.iter().filter_map(|m| m.vm_name.as_deref()) {
            if !seen.insert(vm_name) {
                return Err(LabError::ConfigError(format!(
                    "Machine {vm_name} is declared more than once in environment {name}"
                )));
            }
        }

        let defaults = decl.config_defaults.clone();
        let disk_image_basedir = expand_home(
            defaults
                .disk_image_basedir
                .as_deref()
                .unwrap_or(DEFAULT_IMAGE_BASEDIR),
        );
        let cloud_image_basedir = expand_home(
            defaults
                .cloud_image_basedir
                .as_deref()
                .unwrap_or(DEFAULT_IMAGE_BASEDIR),
        );

        Ok(Self {
            name,
            uri: decl
                .libvirt_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_LIBVIRT_URI.to_string()),
            domain: defaults.domain.clone(),
            defaults,
            disk_image_basedir,
            cloud_image_basedir,
        })
    }

    /// Per-machine working directory: `{disk_image_basedir}/{environment}/{vm_name}`.
    pub fn work_dir(&self, vm_name: &str) -> PathBuf {
        self.disk_image_basedir.join(&self.name).join(vm_name)
    }

    /// Directory holding downloaded cloud images.
    pub fn cloud_image_dir(&self) -> PathBuf {
        self.cloud_image_basedir.join("cloud-images")
    }

    /// Shared-directory mounts applied to every machine.
    pub fn mounts(&self) -> &[MountDecl] {
        &self.defaults.mounts
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Return the filename at the end of a URL path, ignoring query and fragment.
pub fn parse_file_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, file) = path.rsplit_once('/')?;
    if file.is_empty() {
        None
    } else {
        Some(file.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
environment:
  - name: lab1
    libvirt_uri: qemu+ssh://root@hv01/system
    config_defaults:
      domain: lab.local
      os: fedora40
      disk_image_basedir: /srv/lvlab
      interfaces:
        network: default
        ip4gw: 10.0.0.1
      disks:
        - name: root
          size: 20G
    machines:
      - vm_name: web01
        interfaces:
          - ip4: 10.0.0.11/24
        disks:
          - name: root
          - name: data
            size: 20G
      - vm_name: db01
        hostname: database
images:
  - name: fedora40
    image_url: https://example.org/pub/Fedora-Cloud-Base-Generic.x86_64-40-1.14.qcow2
    checksum_type: sha256
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.machines().len(), 2);
        assert_eq!(manifest.images.len(), 1);

        let env = manifest.environment().unwrap();
        assert_eq!(env.name, "lab1");
        assert_eq!(env.uri, "qemu+ssh://root@hv01/system");
        assert_eq!(env.domain.as_deref(), Some("lab.local"));
        assert_eq!(env.disk_image_basedir, PathBuf::from("/srv/lvlab"));
        assert_eq!(
            env.cloud_image_dir(),
            PathBuf::from(DEFAULT_IMAGE_BASEDIR).join("cloud-images")
        );
    }

    #[test]
    fn test_default_uri() {
        let manifest = Manifest::from_yaml("environment:\n  - name: lab\n").unwrap();
        assert_eq!(manifest.environment().unwrap().uri, DEFAULT_LIBVIRT_URI);
    }

    #[test]
    fn test_missing_environment_is_config_error() {
        let manifest = Manifest::from_yaml("images: []\n").unwrap();
        assert!(matches!(
            manifest.environment(),
            Err(LabError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unnamed_environment_is_config_error() {
        let manifest = Manifest::from_yaml("environment:\n  - machines: []\n").unwrap();
        assert!(matches!(
            manifest.environment(),
            Err(LabError::ConfigError(_))
        ));
    }

    #[test]
    fn test_find_machine_by_vm_name_or_hostname() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert!(manifest.find_machine("web01").is_ok());
        assert_eq!(
            manifest.find_machine("database").unwrap().vm_name.as_deref(),
            Some("db01")
        );
        assert!(matches!(
            manifest.find_machine("nope"),
            Err(LabError::MachineNotFound(_))
        ));
    }

    #[test]
    fn test_vm_name_match_wins_over_earlier_hostname_match() {
        let manifest = Manifest::from_yaml(
            "environment:\n  - name: lab1\n    machines:\n      - vm_name: db01\n        hostname: web01\n      - vm_name: web01\n",
        )
        .unwrap();
        assert_eq!(
            manifest.find_machine("web01").unwrap().vm_name.as_deref(),
            Some("web01")
        );
    }

    #[test]
    fn test_duplicate_vm_name_is_config_error() {
        let manifest = Manifest::from_yaml(
            "environment:\n  - name: lab1\n    machines:\n      - vm_name: web01\n      - vm_name: web01\n        hostname: other\n",
        )
        .unwrap();
        match manifest.environment() {
            Err(LabError::ConfigError(message)) => assert!(message.contains("web01")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_work_dir_layout() {
        let env = Manifest::from_yaml(MANIFEST).unwrap().environment().unwrap();
        assert_eq!(
            env.work_dir("web01"),
            PathBuf::from("/srv/lvlab/lab1/web01")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = Manifest::load(&dir.path().join("Lvlab.yml"));
        assert!(matches!(result, Err(LabError::ConfigError(_))));
    }

    #[test]
    fn test_load_invalid_yaml_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Lvlab.yml");
        std::fs::write(&path, "environment: [ {name: lab1, machines: 3} ]").unwrap();
        let result = Manifest::load(&path);
        assert!(matches!(result, Err(LabError::ConfigError(_))));
    }

    #[test]
    fn test_interface_overlay_declared_wins() {
        let defaults = InterfaceDecl {
            network: Some("default".to_string()),
            ip4gw: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        let declared = InterfaceDecl {
            network: Some("lab".to_string()),
            ip4: Some("10.0.0.5/24".to_string()),
            ..Default::default()
        };
        let merged = defaults.overlay(&declared);
        assert_eq!(merged.network.as_deref(), Some("lab"));
        assert_eq!(merged.ip4.as_deref(), Some("10.0.0.5/24"));
        assert_eq!(merged.ip4gw.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_parse_file_from_url() {
        assert_eq!(
            parse_file_from_url("https://example.org/a/b/image.qcow2").as_deref(),
            Some("image.qcow2")
        );
        assert_eq!(
            parse_file_from_url("https://example.org/SHA256SUMS?x=1#frag").as_deref(),
            Some("SHA256SUMS")
        );
        assert_eq!(parse_file_from_url("https://example.org/"), None);
        assert_eq!(parse_file_from_url("https://example.org"), None);
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib"), PathBuf::from("/var/lib"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/lvlab"), home.join("lvlab"));
        }
    }
}
