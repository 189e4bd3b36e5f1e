//! Operator Lifecycle Manager resources the installer writes.
//!
//! The component instances (EventStreams, QueueManager, ...) stay untyped,
//! their schemas belong to the vendor operators. OLM kinds are small and
//! stable, so they get proper types.

use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const OLM_API_VERSION: &str = "operators.coreos.com/v1alpha1";
pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    pub registry_poll: Option<RegistryPoll>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
pub struct RegistryPoll {
    pub interval: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub last_observed_state: Option<String>,
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    pub connection_state: Option<ConnectionState>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "CatalogSource")]
#[kube(namespaced, status = "CatalogSourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    pub source_type: String,
    pub image: String,
    pub display_name: String,
    pub publisher: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub state: Option<String>,
    #[serde(rename = "installedCSV")]
    pub installed_csv: Option<String>,
    #[serde(rename = "currentCSV")]
    pub current_csv: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "Subscription")]
#[kube(namespaced, status = "SubscriptionStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub channel: String,
    pub name: String,
    pub source: String,
    pub source_namespace: String,
    pub install_plan_approval: String,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[kube(group = "operators.coreos.com", version = "v1", kind = "OperatorGroup")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    pub target_namespaces: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn catalog_source_serializes_with_olm_field_names() {
        let cs = CatalogSource::new(
            "ibm-eventstreams",
            CatalogSourceSpec {
                source_type: "grpc".into(),
                image: "icr.io/cpopen/ibm-eventstreams-catalog:3.5.0".into(),
                display_name: "ibm-eventstreams".into(),
                publisher: "IBM".into(),
                update_strategy: None,
            },
        );
        let value = serde_json::to_value(&cs).unwrap();
        assert_eq!(value["apiVersion"], OLM_API_VERSION);
        assert_eq!(value["kind"], "CatalogSource");
        assert_eq!(value["spec"]["sourceType"], "grpc");
        assert!(value["spec"].get("updateStrategy").is_none());
    }

    #[test]
    fn subscription_status_reads_csv_fields() {
        let status: SubscriptionStatus = serde_json::from_value(serde_json::json!({
            "state": "AtLatestKnown",
            "installedCSV": "ibm-eventstreams.v3.5.0"
        }))
        .unwrap();
        assert_eq!(status.state.as_deref(), Some("AtLatestKnown"));
        assert_eq!(status.installed_csv.as_deref(), Some("ibm-eventstreams.v3.5.0"));
        assert_eq!(OperatorGroup::api_version(&()), "operators.coreos.com/v1");
    }
}
