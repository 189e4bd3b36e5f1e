use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{Condition, ResourceRef};

/// An installable Cloud Pak for Integration / Event Automation capability.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum,
)]
pub enum Component {
    #[serde(rename = "pn")]
    #[value(name = "pn")]
    PlatformNavigator,
    #[serde(rename = "es")]
    #[value(name = "es")]
    EventStreams,
    #[serde(rename = "flink")]
    #[value(name = "flink")]
    Flink,
    #[serde(rename = "ep")]
    #[value(name = "ep")]
    EventProcessing,
    #[serde(rename = "mq")]
    #[value(name = "mq")]
    Mq,
    #[serde(rename = "ace")]
    #[value(name = "ace")]
    AppConnect,
    #[serde(rename = "apic")]
    #[value(name = "apic")]
    ApiConnect,
}

/// Catalog image and operator package for one component.
pub struct OperatorSource {
    pub catalog: &'static str,
    pub image: &'static str,
    pub package: &'static str,
    pub channel: &'static str,
}

/// How a component is reached once it is running.
pub struct AccessRoute {
    pub route: String,
    pub credential: Option<Credential>,
}

pub struct Credential {
    pub secret: String,
    pub key: &'static str,
    pub username: &'static str,
}

/// Which readiness budget a component instance gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    Instance,
    EventStreams,
}

pub const ROUTE_API_VERSION: &str = "route.openshift.io/v1";

impl Component {
    pub fn key(&self) -> &'static str {
        match self {
            Component::PlatformNavigator => "platform-navigator",
            Component::EventStreams => "event-streams",
            Component::Flink => "flink",
            Component::EventProcessing => "event-processing",
            Component::Mq => "mq",
            Component::AppConnect => "app-connect",
            Component::ApiConnect => "api-connect",
        }
    }

    pub fn operator(&self) -> OperatorSource {
        match self {
            Component::PlatformNavigator => OperatorSource {
                catalog: "ibm-integration-platform-navigator-catalog",
                image: "icr.io/cpopen/ibm-integration-platform-navigator-catalog:7.3.2",
                package: "ibm-integration-platform-navigator",
                channel: "v7.3",
            },
            Component::EventStreams => OperatorSource {
                catalog: "ibm-eventstreams",
                image: "icr.io/cpopen/ibm-eventstreams-catalog:3.5.0",
                package: "ibm-eventstreams",
                channel: "v3.5",
            },
            Component::Flink => OperatorSource {
                catalog: "ibm-eventautomation-flink-catalog",
                image: "icr.io/cpopen/ibm-eventautomation-flink-operator-catalog:1.2.2",
                package: "ibm-eventautomation-flink",
                channel: "v1.2",
            },
            Component::EventProcessing => OperatorSource {
                catalog: "ibm-eventprocessing-catalog",
                image: "icr.io/cpopen/ibm-eventprocessing-operator-catalog:1.2.2",
                package: "ibm-eventprocessing",
                channel: "v1.2",
            },
            Component::Mq => OperatorSource {
                catalog: "ibmmq-operator-catalogsource",
                image: "icr.io/cpopen/ibm-mq-operator-catalog:3.2.4",
                package: "ibm-mq",
                channel: "v3.2",
            },
            Component::AppConnect => OperatorSource {
                catalog: "appconnect-operator-catalogsource",
                image: "icr.io/cpopen/appconnect-operator-catalog:12.0.3",
                package: "ibm-appconnect",
                channel: "v12.0",
            },
            Component::ApiConnect => OperatorSource {
                catalog: "ibm-apiconnect-catalog",
                image: "icr.io/cpopen/ibm-apiconnect-catalog:5.2.0",
                package: "ibm-apiconnect",
                channel: "v5.2",
            },
        }
    }

    /// (apiVersion, kind, default instance name)
    pub fn instance(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Component::PlatformNavigator => (
                "integration.ibm.com/v1beta1",
                "PlatformNavigator",
                "cp4i-navigator",
            ),
            Component::EventStreams => ("eventstreams.ibm.com/v1beta2", "EventStreams", "es-demo"),
            Component::Flink => ("flink.apache.org/v1beta1", "FlinkDeployment", "ea-flink"),
            Component::EventProcessing => ("events.ibm.com/v1beta1", "EventProcessing", "ea-ep"),
            Component::Mq => ("mq.ibm.com/v1beta1", "QueueManager", "qm-demo"),
            Component::AppConnect => ("appconnect.ibm.com/v1beta1", "Dashboard", "ace-dashboard"),
            Component::ApiConnect => (
                "apiconnect.ibm.com/v1beta1",
                "APIConnectCluster",
                "apim-demo",
            ),
        }
    }

    pub fn instance_ref(&self, namespace: &str) -> ResourceRef {
        let (api_version, kind, name) = self.instance();
        ResourceRef::namespaced(api_version, kind, namespace, name)
    }

    pub fn instance_name(&self) -> &'static str {
        self.instance().2
    }

    /// What the operator reports once the instance is usable.
    pub fn readiness(&self) -> Condition {
        match self {
            Component::PlatformNavigator => Condition::status_condition("Ready", "True"),
            Component::EventStreams => Condition::field_equals("status.phase", "Ready"),
            Component::Flink => {
                Condition::field_equals("status.jobManagerDeploymentStatus", "READY")
            }
            Component::EventProcessing => Condition::field_equals("status.phase", "Running"),
            Component::Mq => Condition::field_equals("status.phase", "Running"),
            Component::AppConnect => Condition::field_equals("status.phase", "Ready"),
            Component::ApiConnect => Condition::field_equals("status.phase", "Ready"),
        }
    }

    pub fn budget(&self) -> Budget {
        match self {
            Component::EventStreams => Budget::EventStreams,
            _ => Budget::Instance,
        }
    }

    /// Components whose instance must be ready first.
    pub fn requires(&self) -> &'static [Component] {
        match self {
            Component::EventProcessing => &[Component::Flink],
            _ => &[],
        }
    }

    pub fn license(&self) -> (&'static str, &'static str) {
        match self {
            Component::EventStreams | Component::Flink | Component::EventProcessing => {
                ("L-CYBH-K48BZQ", "EventAutomationNonProduction")
            }
            Component::PlatformNavigator | Component::AppConnect => {
                ("L-JTPV-KYG8TF", "CloudPakForIntegrationNonProduction")
            }
            Component::Mq => ("L-JTPV-KYG8TF", "NonProduction"),
            Component::ApiConnect => ("L-DZZQ-MGVN8V", "nonproduction"),
        }
    }

    pub fn access(&self) -> Option<AccessRoute> {
        let name = self.instance_name();
        match self {
            Component::PlatformNavigator => Some(AccessRoute {
                route: format!("{}-pn", name),
                credential: Some(Credential {
                    secret: "integration-admin-initial-temporary-credentials".into(),
                    key: "password",
                    username: "integration-admin",
                }),
            }),
            Component::EventStreams => Some(AccessRoute {
                route: format!("{}-ibm-es-ui", name),
                credential: None,
            }),
            Component::EventProcessing => Some(AccessRoute {
                route: format!("{}-ibm-ep-rt", name),
                credential: Some(Credential {
                    secret: format!("{}-ibm-ep-user-credentials", name),
                    key: "password",
                    username: "ep-admin",
                }),
            }),
            Component::Mq => Some(AccessRoute {
                route: format!("{}-ibm-mq-web", name),
                credential: None,
            }),
            Component::AppConnect => Some(AccessRoute {
                route: format!("{}-ui", name),
                credential: None,
            }),
            Component::ApiConnect => Some(AccessRoute {
                route: format!("{}-mgmt-admin", name),
                credential: Some(Credential {
                    secret: format!("{}-mgmt-admin-pass", name),
                    key: "password",
                    username: "admin",
                }),
            }),
            Component::Flink => None,
        }
    }

    /// Secret the operator fills in with the first admin password, if the
    /// installer should wait for it.
    pub fn credential_secret(&self, namespace: &str) -> Option<ResourceRef> {
        match self {
            Component::PlatformNavigator => self
                .access()
                .and_then(|a| a.credential)
                .map(|c| ResourceRef::namespaced("v1", "Secret", namespace, &c.secret)),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
