//! Turns an `InstallConfig` into install and uninstall plans.

use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::components::{Budget, Component};
use crate::config::{InstallConfig, Storage, Timings};
use crate::crd::{SubscriptionStatus, OLM_API_VERSION};
use crate::error::Error;
use crate::plan::{Plan, Step};
use crate::poller::PollSpec;
use crate::render::{Manifest, Renderer, Template, ENTITLEMENT_SECRET, FLINK_SERVICE_ACCOUNT};
use crate::resource::{Condition, ResourceRef};
use crate::retry::RetryPolicy;

pub const NAMESPACE_STEP: &str = "namespace";
pub const ENTITLEMENT_STEP: &str = "entitlement-key";
pub const OPERATOR_GROUP_STEP: &str = "operator-group";

pub fn catalog_step(component: Component) -> String {
    format!("catalog-{}", component.key())
}

pub fn operator_step(component: Component) -> String {
    format!("operator-{}", component.key())
}

pub fn instance_step(component: Component) -> String {
    format!("instance-{}", component.key())
}

pub fn credentials_step(component: Component) -> String {
    format!("credentials-{}", component.key())
}

pub fn retry_policy(timings: &Timings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: timings.apply_attempts,
        backoff: Duration::from_secs(timings.apply_backoff),
    }
}

fn poll(timings: &Timings, resource: ResourceRef, condition: Condition, interval: u64, timeout: u64) -> PollSpec {
    PollSpec::new(resource, condition, Duration::from_secs(interval))
        .with_timeout(Duration::from_secs(timeout))
        .with_stall_threshold(timings.stall_threshold)
}

fn instance_timeout(timings: &Timings, component: Component) -> u64 {
    match component.budget() {
        Budget::Instance => timings.instance_timeout,
        Budget::EventStreams => timings.event_streams_timeout,
    }
}

/// Namespace and pull secret, then per component: catalog, operator, instance.
pub fn build_install_plan(config: &InstallConfig) -> Result<Plan, Error> {
    let renderer = Renderer::new(config);
    let t = &config.timings;
    let mut plan = Plan::new();

    let namespace = renderer.render(Template::Namespace)?;
    let namespace_ready = poll(
        t,
        namespace.resource.clone(),
        Condition::field_equals("status.phase", "Active"),
        t.poll_interval,
        t.namespace_timeout,
    );
    plan.push(Step::new(NAMESPACE_STEP).apply(namespace).awaits(namespace_ready));

    let has_key = config.entitlement_key.is_some();
    if has_key {
        plan.push(
            Step::new(ENTITLEMENT_STEP)
                .apply(renderer.render(Template::EntitlementSecret)?)
                .after(NAMESPACE_STEP),
        );
    }

    plan.push(
        Step::new(OPERATOR_GROUP_STEP)
            .apply(renderer.render(Template::OperatorGroup)?)
            .after(NAMESPACE_STEP),
    );

    for &component in &config.components {
        let catalog = renderer.render(Template::CatalogSource(component))?;
        let catalog_ready = poll(
            t,
            catalog.resource.clone(),
            Condition::field_equals("status.connectionState.lastObservedState", "READY"),
            t.catalog_interval,
            t.catalog_timeout,
        );
        plan.push(Step::new(catalog_step(component)).apply(catalog).awaits(catalog_ready));

        let subscription = renderer.render(Template::Subscription(component))?;
        let operator_ready = poll(
            t,
            subscription.resource.clone(),
            Condition::All(vec![
                Condition::field_equals("status.state", "AtLatestKnown"),
                Condition::field_present("status.installedCSV"),
            ]),
            t.poll_interval,
            t.operator_timeout,
        );
        plan.push(
            Step::new(operator_step(component))
                .apply(subscription)
                .awaits(operator_ready)
                .after(catalog_step(component))
                .after(OPERATOR_GROUP_STEP),
        );

        plan.push(instance(config, &renderer, component)?);

        if let Some(secret) = component.credential_secret(&config.namespace) {
            let populated = poll(
                t,
                secret,
                Condition::field_present("data.password"),
                t.poll_interval,
                t.credential_timeout,
            );
            plan.push(
                Step::new(credentials_step(component))
                    .awaits(populated)
                    .after(instance_step(component)),
            );
        }
    }

    plan.validate()?;
    Ok(plan)
}

fn instance(config: &InstallConfig, renderer: &Renderer, component: Component) -> Result<Step, Error> {
    let t = &config.timings;
    let manifest = renderer.render(Template::Instance(component))?;
    let ready = poll(
        t,
        manifest.resource.clone(),
        component.readiness(),
        t.poll_interval,
        instance_timeout(t, component),
    );

    let mut step = Step::new(instance_step(component)).after(operator_step(component));
    if config.entitlement_key.is_some() {
        step = step.after(ENTITLEMENT_STEP);
    }
    for &required in component.requires() {
        step = step.after(instance_step(required));
    }

    if component == Component::Flink {
        // The operator creates the service account; it may not be there yet.
        if config.entitlement_key.is_some() {
            let account = ResourceRef::namespaced("v1", "ServiceAccount", &config.namespace, FLINK_SERVICE_ACCOUNT);
            step = step.patch(
                account,
                json!({"imagePullSecrets": [{"name": ENTITLEMENT_SECRET}]}),
                true,
            );
        }
        if let Storage::Persistent { .. } = config.storage {
            step = step.apply(renderer.render(Template::FlinkStateClaim)?);
        }
    }

    Ok(step.apply(manifest).awaits(ready))
}

pub fn csv_ref(namespace: &str, name: &str) -> ResourceRef {
    ResourceRef::namespaced(OLM_API_VERSION, "ClusterServiceVersion", namespace, name)
}

/// `status.installedCSV` of each selected component's subscription. Deleting
/// the subscription alone leaves that CSV, and the operator, running.
/// Unreadable subscriptions are logged and left out.
pub async fn installed_csvs(
    client: &dyn ClusterClient,
    config: &InstallConfig,
) -> Result<BTreeMap<Component, String>, Error> {
    let renderer = Renderer::new(config);
    let mut csvs = BTreeMap::new();
    for &component in &config.components {
        let subscription = renderer.render(Template::Subscription(component))?.resource;
        let object = match client.get(&subscription).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                debug!(subscription = %subscription, "Not subscribed");
                continue;
            }
            Err(e) => {
                warn!(subscription = %subscription, error = %e, "Could not read subscription");
                continue;
            }
        };
        let status = match object.get("status") {
            Some(status) => serde_json::from_value::<SubscriptionStatus>(status.clone()),
            None => Ok(SubscriptionStatus::default()),
        };
        match status {
            Ok(SubscriptionStatus {
                installed_csv: Some(csv),
                ..
            }) => {
                info!(subscription = %subscription, csv = %csv, "Found installed operator");
                csvs.insert(component, csv);
            }
            Ok(_) => debug!(subscription = %subscription, "No installed CSV"),
            Err(e) => warn!(subscription = %subscription, error = %e, "Unreadable subscription status"),
        }
    }
    Ok(csvs)
}

/// Reverse of the install plan: instances, then subscriptions and the CSVs
/// they installed, then catalogs. The namespace and pull secret are left in
/// place.
pub fn build_uninstall_plan(
    config: &InstallConfig,
    csvs: &BTreeMap<Component, String>,
) -> Result<Plan, Error> {
    let renderer = Renderer::new(config);
    let t = &config.timings;
    let mut plan = Plan::new();
    let removal = |resource: ResourceRef, timeout: u64| {
        poll(t, resource, Condition::Absent, t.poll_interval, timeout)
    };

    for &component in &config.components {
        let instance = component.instance_ref(&config.namespace);
        let mut step = Step::new(format!("remove-{}", instance_step(component)))
            .delete(instance.clone())
            .awaits(removal(instance, instance_timeout(t, component)));
        // Dependents go first, e.g. Event Processing before Flink.
        for dependent in config.components.iter().filter(|c| c.requires().contains(&component)) {
            step = step.after(format!("remove-{}", instance_step(*dependent)));
        }
        if component == Component::Flink {
            if let Storage::Persistent { .. } = config.storage {
                step = step.delete(renderer.render(Template::FlinkStateClaim)?.resource);
            }
        }
        plan.push(step);

        let subscription = renderer.render(Template::Subscription(component))?.resource;
        plan.push(
            Step::new(format!("remove-{}", operator_step(component)))
                .delete(subscription.clone())
                .awaits(removal(subscription, t.operator_timeout))
                .after(format!("remove-{}", instance_step(component))),
        );

        let mut last = format!("remove-{}", operator_step(component));
        if let Some(name) = csvs.get(&component) {
            let csv = csv_ref(&config.namespace, name);
            let step = Step::new(format!("remove-csv-{}", component.key()))
                .delete(csv.clone())
                .awaits(removal(csv, t.operator_timeout))
                .after(last);
            last = step.name.clone();
            plan.push(step);
        }

        let catalog = renderer.render(Template::CatalogSource(component))?.resource;
        plan.push(
            Step::new(format!("remove-{}", catalog_step(component)))
                .delete(catalog.clone())
                .awaits(removal(catalog, t.operator_timeout))
                .after(last),
        );
    }

    plan.validate()?;
    Ok(plan)
}

/// Every manifest the install plan would apply, in plan order.
pub fn render_all(config: &InstallConfig) -> Result<Vec<Manifest>, Error> {
    let plan = build_install_plan(config)?;
    Ok(plan
        .steps
        .iter()
        .flat_map(|s| s.manifests())
        .cloned()
        .collect())
}
