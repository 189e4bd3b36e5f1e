use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements, Secret,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::components::Component;
use crate::config::{InstallConfig, Storage};
use crate::crd::{
    CatalogSource, CatalogSourceSpec, OperatorGroup, OperatorGroupSpec, RegistryPoll,
    Subscription, SubscriptionSpec, UpdateStrategy, MARKETPLACE_NAMESPACE,
};
use crate::error::Error;
use crate::resource::ResourceRef;

pub const ENTITLEMENT_SECRET: &str = "ibm-entitlement-key";
pub const ENTITLEMENT_REGISTRY: &str = "cp.icr.io";
pub const FLINK_SERVICE_ACCOUNT: &str = "flink";

/// A rendered document together with the identity it will have on the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub resource: ResourceRef,
    pub document: Value,
}

impl Manifest {
    /// Read identity out of an untyped document.
    pub fn from_document(document: Value) -> Result<Manifest, Error> {
        let field = |pointer: &str| document.pointer(pointer).and_then(Value::as_str);
        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::invalid_plan("manifest is missing apiVersion"))?;
        let kind = field("/kind").ok_or_else(|| Error::invalid_plan("manifest is missing kind"))?;
        let name = field("/metadata/name")
            .ok_or_else(|| Error::invalid_plan(format!("{} manifest is missing metadata.name", kind)))?;
        let resource = match field("/metadata/namespace") {
            Some(ns) => ResourceRef::namespaced(api_version, kind, ns, name),
            None => ResourceRef::cluster(api_version, kind, name),
        };
        Ok(Manifest { resource, document })
    }

    pub fn from_object<K: Serialize>(object: &K) -> Result<Manifest, Error> {
        Manifest::from_document(serde_json::to_value(object)?)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(&self.document)?)
    }
}

/// Every document the installer knows how to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Template {
    Namespace,
    EntitlementSecret,
    OperatorGroup,
    CatalogSource(Component),
    Subscription(Component),
    Instance(Component),
    /// Volume for Flink checkpoints and savepoints when storage is persistent.
    FlinkStateClaim,
}

/// Pure mapping from the install configuration to documents. No cluster access.
pub struct Renderer<'a> {
    config: &'a InstallConfig,
}

impl<'a> Renderer<'a> {
    pub fn new(config: &'a InstallConfig) -> Renderer<'a> {
        Renderer { config }
    }

    pub fn render(&self, template: Template) -> Result<Manifest, Error> {
        let namespace = &self.config.namespace;
        match template {
            Template::Namespace => Manifest::from_object(&Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.clone()),
                    labels: Some(managed_by()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            Template::EntitlementSecret => self.entitlement_secret(),
            Template::OperatorGroup => {
                let mut group = OperatorGroup::new(
                    &format!("{}-operatorgroup", namespace),
                    OperatorGroupSpec {
                        target_namespaces: vec![namespace.clone()],
                    },
                );
                group.metadata.namespace = Some(namespace.clone());
                Manifest::from_object(&group)
            }
            Template::CatalogSource(component) => {
                let source = component.operator();
                let mut catalog = CatalogSource::new(
                    source.catalog,
                    CatalogSourceSpec {
                        source_type: "grpc".into(),
                        image: source.image.into(),
                        display_name: source.catalog.into(),
                        publisher: "IBM".into(),
                        update_strategy: Some(UpdateStrategy {
                            registry_poll: Some(RegistryPoll {
                                interval: "45m".into(),
                            }),
                        }),
                    },
                );
                catalog.metadata.namespace = Some(MARKETPLACE_NAMESPACE.into());
                Manifest::from_object(&catalog)
            }
            Template::Subscription(component) => {
                let source = component.operator();
                let mut subscription = Subscription::new(
                    source.package,
                    SubscriptionSpec {
                        channel: source.channel.into(),
                        name: source.package.into(),
                        source: source.catalog.into(),
                        source_namespace: MARKETPLACE_NAMESPACE.into(),
                        install_plan_approval: "Automatic".into(),
                    },
                );
                subscription.metadata.namespace = Some(namespace.clone());
                Manifest::from_object(&subscription)
            }
            Template::Instance(component) => self.instance(component),
            Template::FlinkStateClaim => self.flink_state_claim(),
        }
    }

    fn entitlement_secret(&self) -> Result<Manifest, Error> {
        let key = self.config.entitlement_key.as_deref().ok_or_else(|| {
            Error::invalid_config("an entitlement key is needed to render the pull secret")
        })?;
        let docker_config = json!({
            "auths": {
                ENTITLEMENT_REGISTRY: {"username": "cp", "password": key}
            }
        });
        let mut string_data = BTreeMap::new();
        string_data.insert(".dockerconfigjson".to_string(), docker_config.to_string());

        Manifest::from_object(&Secret {
            metadata: ObjectMeta {
                name: Some(ENTITLEMENT_SECRET.into()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(managed_by()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/dockerconfigjson".into()),
            string_data: Some(string_data),
            ..Default::default()
        })
    }

    fn flink_state_claim(&self) -> Result<Manifest, Error> {
        let (class_name, size) = match &self.config.storage {
            Storage::Persistent { class_name, size } => (class_name.clone(), size.clone()),
            Storage::Ephemeral => {
                return Err(Error::invalid_plan(
                    "Flink state claim needs persistent storage",
                ))
            }
        };
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(size));

        Manifest::from_object(&PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(flink_claim_name()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(managed_by()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                storage_class_name: Some(class_name),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn instance(&self, component: Component) -> Result<Manifest, Error> {
        let (api_version, kind, name) = component.instance();
        let (license, license_use) = component.license();
        let license = json!({
            "accept": self.config.accept_license,
            "license": license,
            "use": license_use,
        });
        let storage = &self.config.storage;

        let spec = match component {
            Component::PlatformNavigator => {
                let mut spec = json!({
                    "license": license,
                    "replicas": 1,
                    "version": "16.1.0",
                });
                if let Some(class_name) = storage.class_name() {
                    spec["storage"] = json!({"class": class_name});
                }
                spec
            }
            Component::EventStreams => json!({
                "version": "latest",
                "license": license,
                "adminApi": {},
                "adminUI": {"authentication": [{"type": "scram-sha-512"}]},
                "apicurioRegistry": {},
                "restProducer": {},
                "strimziOverrides": {
                    "kafka": {
                        "replicas": 1,
                        "config": {
                            "offsets.topic.replication.factor": 1,
                            "transaction.state.log.min.isr": 1,
                            "transaction.state.log.replication.factor": 1,
                        },
                        "listeners": [
                            {"name": "external", "port": 9094, "type": "route", "tls": true,
                             "authentication": {"type": "scram-sha-512"}},
                            {"name": "tls", "port": 9093, "type": "internal", "tls": true,
                             "authentication": {"type": "tls"}},
                        ],
                        "storage": claim_storage(storage),
                    },
                    "zookeeper": {
                        "replicas": 1,
                        "storage": claim_storage(storage),
                    },
                },
            }),
            Component::Flink => {
                let mut spec = json!({
                    "flinkVersion": "v1_19",
                    "serviceAccount": FLINK_SERVICE_ACCOUNT,
                    "mode": "native",
                    "flinkConfiguration": {
                        "license.use": license["use"],
                        "license.license": license["license"],
                        "license.accept": self.config.accept_license.to_string(),
                        "taskmanager.numberOfTaskSlots": "10",
                    },
                    "jobManager": {"replicas": 1, "resource": {"cpu": 0.25, "memory": "1024m"}},
                    "taskManager": {"resource": {"cpu": 1, "memory": "2048m"}},
                });
                if let Storage::Persistent { .. } = storage {
                    let config = &mut spec["flinkConfiguration"];
                    config["state.checkpoints.dir"] = json!("file:///opt/flink/volume/flink-cp");
                    config["state.savepoints.dir"] = json!("file:///opt/flink/volume/flink-sp");
                    config["high-availability.type"] = json!("org.apache.flink.kubernetes.highavailability.KubernetesHaServicesFactory");
                    config["high-availability.storageDir"] = json!("file:///opt/flink/volume/flink-ha");
                    spec["podTemplate"] = json!({
                        "spec": {
                            "containers": [{
                                "name": "flink-main-container",
                                "volumeMounts": [{"name": "flink-volume", "mountPath": "/opt/flink/volume"}],
                            }],
                            "volumes": [{
                                "name": "flink-volume",
                                "persistentVolumeClaim": {"claimName": flink_claim_name()},
                            }],
                        }
                    });
                }
                spec
            }
            Component::EventProcessing => {
                let (_, _, flink_name) = Component::Flink.instance();
                json!({
                    "license": license,
                    "flink": {
                        "endpoint": format!("{}-rest.{}.svc.cluster.local:8081", flink_name, self.config.namespace),
                    },
                    "authoring": {
                        "authConfig": {"authType": "LOCAL"},
                        "storage": match storage {
                            Storage::Ephemeral => json!({"type": "ephemeral"}),
                            Storage::Persistent { class_name, .. } => {
                                json!({"type": "persistent-claim", "storageClassName": class_name})
                            }
                        },
                    },
                })
            }
            Component::Mq => json!({
                "license": license,
                "version": "9.4.0.0-r3",
                "web": {"enabled": true},
                "queueManager": {
                    "name": "QM1",
                    "storage": {"queueManager": claim_storage(storage)},
                },
            }),
            Component::AppConnect => json!({
                "license": license,
                "version": "12.0",
                "replicas": 1,
                "useCommonServices": false,
                "storage": claim_storage(storage),
            }),
            Component::ApiConnect => {
                let mut license = license;
                license["metric"] = json!("VIRTUAL_PROCESSOR_CORE");
                let mut spec = json!({
                    "license": license,
                    "profile": "n1xc7.m48",
                    "version": "10.0.8.1",
                });
                if let Some(class_name) = storage.class_name() {
                    spec["storageClassName"] = json!(class_name);
                }
                spec
            }
        };

        Manifest::from_document(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": self.config.namespace,
                "labels": managed_by(),
            },
            "spec": spec,
        }))
    }
}

pub fn flink_claim_name() -> String {
    format!("{}-pvc", Component::Flink.instance_name())
}

fn managed_by() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "cloudpak-installer".to_string(),
    );
    labels
}

/// Storage block shared by the Strimzi, MQ and App Connect CRs.
fn claim_storage(storage: &Storage) -> Value {
    match storage {
        Storage::Ephemeral => json!({"type": "ephemeral"}),
        Storage::Persistent { class_name, size } => {
            json!({"type": "persistent-claim", "class": class_name, "size": size})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use clap::ValueEnum;

    fn config(storage_class: Option<&str>) -> InstallConfig {
        InstallConfig::try_from(ConfigFile {
            namespace: Some("integration".into()),
            entitlement_key: Some("eyJhbGciOi".into()),
            storage_class: storage_class.map(String::from),
            components: Some(Component::value_variants().to_vec()),
            accept_license: Some(true),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn namespace_is_cluster_scoped() {
        let config = config(None);
        let manifest = Renderer::new(&config).render(Template::Namespace).unwrap();
        assert_eq!(manifest.resource, ResourceRef::cluster("v1", "Namespace", "integration"));
    }

    #[test]
    fn catalog_sources_land_in_the_marketplace() {
        let config = config(None);
        let manifest = Renderer::new(&config)
            .render(Template::CatalogSource(Component::EventStreams))
            .unwrap();
        assert_eq!(manifest.resource.namespace.as_deref(), Some(MARKETPLACE_NAMESPACE));
        assert_eq!(manifest.document["spec"]["image"], "icr.io/cpopen/ibm-eventstreams-catalog:3.5.0");

        let sub = Renderer::new(&config)
            .render(Template::Subscription(Component::EventStreams))
            .unwrap();
        assert_eq!(sub.resource.namespace.as_deref(), Some("integration"));
        assert_eq!(sub.document["spec"]["source"], "ibm-eventstreams");
        assert_eq!(sub.document["spec"]["sourceNamespace"], MARKETPLACE_NAMESPACE);
    }

    #[test]
    fn storage_class_switches_storage_blocks() {
        let ephemeral = config(None);
        let es = Renderer::new(&ephemeral)
            .render(Template::Instance(Component::EventStreams))
            .unwrap();
        assert_eq!(es.document["spec"]["strimziOverrides"]["kafka"]["storage"]["type"], "ephemeral");
        let apic = Renderer::new(&ephemeral)
            .render(Template::Instance(Component::ApiConnect))
            .unwrap();
        assert!(apic.document["spec"].get("storageClassName").is_none());
        assert!(Renderer::new(&ephemeral).render(Template::FlinkStateClaim).is_err());

        let persistent = config(Some("rook-ceph-block"));
        let es = Renderer::new(&persistent)
            .render(Template::Instance(Component::EventStreams))
            .unwrap();
        let kafka_storage = &es.document["spec"]["strimziOverrides"]["kafka"]["storage"];
        assert_eq!(kafka_storage["type"], "persistent-claim");
        assert_eq!(kafka_storage["class"], "rook-ceph-block");
        let flink = Renderer::new(&persistent)
            .render(Template::Instance(Component::Flink))
            .unwrap();
        assert!(flink.document["spec"].get("podTemplate").is_some());
        let claim = Renderer::new(&persistent).render(Template::FlinkStateClaim).unwrap();
        assert_eq!(claim.document["spec"]["storageClassName"], "rook-ceph-block");
    }

    #[test]
    fn entitlement_secret_needs_a_key() {
        let mut config = config(None);
        let secret = Renderer::new(&config).render(Template::EntitlementSecret).unwrap();
        assert_eq!(secret.document["type"], "kubernetes.io/dockerconfigjson");
        assert!(secret.document["stringData"][".dockerconfigjson"]
            .as_str()
            .unwrap()
            .contains(ENTITLEMENT_REGISTRY));

        config.entitlement_key = None;
        assert!(Renderer::new(&config).render(Template::EntitlementSecret).is_err());
    }

    #[test]
    fn event_processing_points_at_flink() {
        let config = config(None);
        let ep = Renderer::new(&config)
            .render(Template::Instance(Component::EventProcessing))
            .unwrap();
        assert_eq!(
            ep.document["spec"]["flink"]["endpoint"],
            "ea-flink-rest.integration.svc.cluster.local:8081"
        );
        assert_eq!(ep.document["spec"]["license"]["accept"], true);
    }

    #[test]
    fn documents_without_identity_are_rejected() {
        assert!(Manifest::from_document(json!({"kind": "ConfigMap"})).is_err());
        assert!(Manifest::from_document(json!({"apiVersion": "v1", "kind": "ConfigMap"})).is_err());
    }
}
