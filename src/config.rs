use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::components::Component;
use crate::error::Error;

pub const DEFAULT_NAMESPACE: &str = "cp4i";

/// Where component data lives. Decided once here, mapped onto each CR by the renderer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Storage {
    #[default]
    Ephemeral,
    #[serde(rename_all = "camelCase")]
    Persistent { class_name: String, size: String },
}

impl Storage {
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Storage::Ephemeral => None,
            Storage::Persistent { class_name, .. } => Some(class_name),
        }
    }
}

/// Poll and retry tuning. All values are seconds; a timeout of 0 waits forever.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Timings {
    pub poll_interval: u64,
    pub catalog_interval: u64,
    pub catalog_timeout: u64,
    pub namespace_timeout: u64,
    pub operator_timeout: u64,
    pub instance_timeout: u64,
    pub event_streams_timeout: u64,
    pub credential_timeout: u64,
    pub apply_attempts: u32,
    pub apply_backoff: u64,
    /// Consecutive failed fetches before a poll gives up.
    pub stall_threshold: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            poll_interval: 10,
            catalog_interval: 5,
            catalog_timeout: 0,
            namespace_timeout: 120,
            operator_timeout: 1200,
            instance_timeout: 1200,
            event_streams_timeout: 1800,
            credential_timeout: 600,
            apply_attempts: 3,
            apply_backoff: 5,
            stall_threshold: 12,
        }
    }
}

/// Settings as they come from a YAML file or the command line. Everything is
/// optional so the two sources can be layered.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigFile {
    pub namespace: Option<String>,
    pub entitlement_key: Option<String>,
    pub storage_class: Option<String>,
    pub storage_size: Option<String>,
    pub components: Option<Vec<Component>>,
    pub accept_license: Option<bool>,
    pub concurrency: Option<usize>,
    pub timings: Option<Timings>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<ConfigFile, Error> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_yaml::from_str(&content)?;
        Ok(file)
    }

    /// Values set in `overrides` win.
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        ConfigFile {
            namespace: overrides.namespace.or(self.namespace),
            entitlement_key: overrides.entitlement_key.or(self.entitlement_key),
            storage_class: overrides.storage_class.or(self.storage_class),
            storage_size: overrides.storage_size.or(self.storage_size),
            components: overrides.components.or(self.components),
            accept_license: overrides.accept_license.or(self.accept_license),
            concurrency: overrides.concurrency.or(self.concurrency),
            timings: overrides.timings.or(self.timings),
        }
    }
}

/// The single immutable input of a run.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct InstallConfig {
    pub namespace: String,
    #[serde(skip_serializing)]
    pub entitlement_key: Option<String>,
    pub storage: Storage,
    pub components: BTreeSet<Component>,
    pub accept_license: bool,
    pub concurrency: usize,
    pub timings: Timings,
}

impl InstallConfig {
    /// Creating component instances needs the license accepted; removing them does not.
    pub fn check_license(&self) -> Result<(), Error> {
        if self.accept_license {
            Ok(())
        } else {
            Err(Error::invalid_config(
                "the selected components require --accept-license",
            ))
        }
    }

    /// Operator and instance images come from cp.icr.io, which needs the pull secret.
    pub fn check_entitlement(&self) -> Result<(), Error> {
        match self.entitlement_key {
            Some(_) => Ok(()),
            None => Err(Error::invalid_config(
                "images are pulled from cp.icr.io; pass --entitlement-key or set IBM_ENTITLEMENT_KEY",
            )),
        }
    }
}

impl TryFrom<ConfigFile> for InstallConfig {
    type Error = Error;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let namespace = file.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !is_dns_label(&namespace) {
            return Err(Error::invalid_config(format!(
                "namespace '{}' is not a valid DNS label",
                namespace
            )));
        }

        let storage = match (file.storage_class, file.storage_size) {
            (Some(class_name), size) if !class_name.is_empty() => Storage::Persistent {
                class_name,
                size: size.unwrap_or_else(|| "10Gi".to_string()),
            },
            (_, Some(_)) => {
                return Err(Error::invalid_config(
                    "storage size given without a storage class",
                ))
            }
            _ => Storage::Ephemeral,
        };

        let mut components: BTreeSet<Component> =
            file.components.unwrap_or_default().into_iter().collect();
        // Event Processing runs its jobs on Flink.
        if components.contains(&Component::EventProcessing) {
            components.insert(Component::Flink);
        }
        if components.is_empty() {
            return Err(Error::invalid_config("no components selected"));
        }

        let accept_license = file.accept_license.unwrap_or(false);
        let entitlement_key = file.entitlement_key.filter(|k| !k.trim().is_empty());

        let concurrency = file.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }

        let timings = file.timings.unwrap_or_default();
        if timings.poll_interval == 0 || timings.catalog_interval == 0 {
            return Err(Error::invalid_config("poll intervals must be greater than 0"));
        }
        if timings.apply_attempts == 0 {
            return Err(Error::invalid_config("applyAttempts must be at least 1"));
        }

        Ok(InstallConfig {
            namespace,
            entitlement_key,
            storage,
            components,
            accept_license,
            concurrency,
            timings,
        })
    }
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigFile {
        ConfigFile {
            components: Some(vec![Component::EventStreams]),
            accept_license: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_ephemeral_storage_in_cp4i() {
        let config = InstallConfig::try_from(base()).unwrap();
        assert_eq!(config.namespace, "cp4i");
        assert_eq!(config.storage, Storage::Ephemeral);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timings.catalog_timeout, 0);
    }

    #[test]
    fn storage_class_selects_persistent_storage() {
        let mut file = base();
        file.storage_class = Some("ocs-storagecluster-ceph-rbd".into());
        let config = InstallConfig::try_from(file).unwrap();
        assert_eq!(
            config.storage,
            Storage::Persistent {
                class_name: "ocs-storagecluster-ceph-rbd".into(),
                size: "10Gi".into()
            }
        );
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut file = base();
        file.namespace = Some("CP4I_Demo".into());
        assert!(matches!(InstallConfig::try_from(file), Err(Error::InvalidConfig(_))));

        let mut file = base();
        file.storage_size = Some("20Gi".into());
        assert!(InstallConfig::try_from(file).is_err());

        let mut file = base();
        file.accept_license = None;
        let config = InstallConfig::try_from(file).unwrap();
        assert!(config.check_license().is_err());

        let mut file = base();
        file.components = Some(vec![]);
        assert!(InstallConfig::try_from(file).is_err());
    }

    #[test]
    fn install_needs_an_entitlement_key() {
        let config = InstallConfig::try_from(base()).unwrap();
        assert!(matches!(config.check_entitlement(), Err(Error::InvalidConfig(_))));

        let mut file = base();
        file.entitlement_key = Some("   ".into());
        let config = InstallConfig::try_from(file).unwrap();
        assert!(config.check_entitlement().is_err());

        let mut file = base();
        file.entitlement_key = Some("eyJhbGciOi".into());
        let config = InstallConfig::try_from(file).unwrap();
        assert!(config.check_entitlement().is_ok());
    }

    #[test]
    fn event_processing_pulls_in_flink() {
        let mut file = base();
        file.components = Some(vec![Component::EventProcessing]);
        let config = InstallConfig::try_from(file).unwrap();
        assert!(config.components.contains(&Component::Flink));
    }

    #[test]
    fn command_line_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            "namespace: integration\nstorageClass: gp3\ncomponents: [es, mq]\ntimings:\n  pollInterval: 2\n",
        )
        .unwrap();
        let overrides = ConfigFile {
            namespace: Some("events".into()),
            accept_license: Some(true),
            ..Default::default()
        };
        let config = InstallConfig::try_from(file.merge(overrides)).unwrap();
        assert_eq!(config.namespace, "events");
        assert_eq!(config.storage.class_name(), Some("gp3"));
        assert!(config.components.contains(&Component::Mq));
        assert_eq!(config.timings.poll_interval, 2);
        assert_eq!(config.timings.operator_timeout, 1200);
    }
}
