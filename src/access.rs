use k8s_openapi::ByteString;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, FieldValue};
use crate::components::{Component, ROUTE_API_VERSION};
use crate::config::InstallConfig;
use crate::executor::{Report, StepState};
use crate::install::instance_step;
use crate::resource::{FieldPath, ResourceRef};

/// Where to reach an installed component and how to log in.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AccessPoint {
    pub component: Component,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl AccessPoint {
    pub fn without_password(mut self) -> AccessPoint {
        self.password = None;
        self
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<20} {}",
            self.component.key(),
            self.url.as_deref().unwrap_or("(route unavailable)")
        )?;
        if let Some(username) = &self.username {
            write!(f, "  user {}", username)?;
            match &self.password {
                Some(password) => write!(f, " / {}", password)?,
                None => write!(f, " (use --show-credentials)")?,
            }
        }
        Ok(())
    }
}

/// Route host and initial credentials of every component that came up.
/// Anything missing is reported as unavailable.
pub async fn collect(
    client: &dyn ClusterClient,
    config: &InstallConfig,
    report: &Report,
) -> Vec<AccessPoint> {
    let mut points = Vec::new();
    for &component in &config.components {
        if report.state_of(&instance_step(component)) != Some(StepState::Satisfied) {
            continue;
        }
        let access = match component.access() {
            Some(access) => access,
            None => continue,
        };

        let route = ResourceRef::namespaced(ROUTE_API_VERSION, "Route", &config.namespace, &access.route);
        let url = read_string(client, &route, "spec.host")
            .await
            .map(|host| format!("https://{}", host));

        let (username, password) = match &access.credential {
            Some(credential) => {
                let secret = ResourceRef::namespaced("v1", "Secret", &config.namespace, &credential.secret);
                let password = read_secret(client, &secret, credential.key).await;
                (Some(credential.username.to_string()), password)
            }
            None => (None, None),
        };

        points.push(AccessPoint {
            component,
            url,
            username,
            password,
        });
    }
    points
}

async fn read_field(client: &dyn ClusterClient, resource: &ResourceRef, path: &str) -> Option<Value> {
    match client.get_field(resource, &FieldPath::parse(path)).await {
        Ok(FieldValue::Present(value)) => Some(value),
        Ok(FieldValue::Absent) => {
            debug!(resource = %resource, path, "Field not set");
            None
        }
        Err(e) => {
            warn!(resource = %resource, error = %e, "Could not read access details");
            None
        }
    }
}

async fn read_string(client: &dyn ClusterClient, resource: &ResourceRef, path: &str) -> Option<String> {
    read_field(client, resource, path)
        .await
        .and_then(|v| v.as_str().map(String::from))
}

/// Secret `data` values are base64 encoded.
async fn read_secret(client: &dyn ClusterClient, secret: &ResourceRef, key: &str) -> Option<String> {
    let encoded = read_field(client, secret, &format!("data.{}", key)).await?;
    let ByteString(bytes) = serde_json::from_value::<ByteString>(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::error::ClientError;
    use crate::executor::ExecutionResult;
    use crate::testing::FakeCluster;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> InstallConfig {
        InstallConfig::try_from(ConfigFile {
            components: Some(vec![Component::PlatformNavigator, Component::Mq, Component::EventStreams]),
            accept_license: Some(true),
            ..Default::default()
        })
        .unwrap()
    }

    fn result(step: &str, state: StepState) -> ExecutionResult {
        ExecutionResult {
            step: step.into(),
            state,
            started_at: None,
            elapsed: Duration::ZERO,
            attempts: 1,
            observed: None,
            detail: None,
        }
    }

    fn route(name: &str) -> ResourceRef {
        ResourceRef::namespaced(ROUTE_API_VERSION, "Route", "cp4i", name)
    }

    #[tokio::test]
    async fn reports_only_satisfied_instances() {
        let cluster = FakeCluster::new();
        cluster.set_object(
            &route("cp4i-navigator-pn"),
            json!({"spec": {"host": "cp4i-navigator-pn-cp4i.apps.example.com"}}),
        );
        cluster.set_object(
            &ResourceRef::namespaced("v1", "Secret", "cp4i", "integration-admin-initial-temporary-credentials"),
            json!({"data": {"password": "czNjcjN0"}}),
        );
        let report = Report {
            results: vec![
                result("instance-platform-navigator", StepState::Satisfied),
                result("instance-mq", StepState::TimedOut),
                result("instance-event-streams", StepState::Satisfied),
            ],
        };

        let points = collect(&cluster, &config(), &report).await;

        assert_eq!(points.len(), 2);
        let navigator = &points[0];
        assert_eq!(navigator.component, Component::PlatformNavigator);
        assert_eq!(
            navigator.url.as_deref(),
            Some("https://cp4i-navigator-pn-cp4i.apps.example.com")
        );
        assert_eq!(navigator.username.as_deref(), Some("integration-admin"));
        assert_eq!(navigator.password.as_deref(), Some("s3cr3t"));

        // No route yet: unavailable, not an error.
        let es = &points[1];
        assert_eq!(es.component, Component::EventStreams);
        assert_eq!(es.url, None);
    }

    #[tokio::test]
    async fn read_errors_leave_fields_unavailable() {
        let cluster = FakeCluster::new();
        cluster.fail_get(&route("cp4i-navigator-pn"), ClientError::communication("connection refused"));
        let report = Report {
            results: vec![result("instance-platform-navigator", StepState::Satisfied)],
        };

        let points = collect(&cluster, &config(), &report).await;
        assert_eq!(points[0].url, None);
        assert_eq!(points[0].password, None);
    }

    #[test]
    fn passwords_are_hidden_unless_asked_for() {
        let point = AccessPoint {
            component: Component::PlatformNavigator,
            url: Some("https://pn.example.com".into()),
            username: Some("integration-admin".into()),
            password: Some("s3cr3t".into()),
        };
        assert!(point.to_string().contains("s3cr3t"));
        let hidden = point.without_password().to_string();
        assert!(!hidden.contains("s3cr3t"));
        assert!(hidden.contains("--show-credentials"));
    }
}
