use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::Error;
use crate::poller::PollSpec;
use crate::render::Manifest;
use crate::resource::ResourceRef;

/// One write a step performs, in order.
#[derive(Clone, Debug)]
pub enum StepAction {
    Apply(Manifest),
    /// Merge patch. A best-effort patch that fails is logged and ignored.
    Patch {
        target: ResourceRef,
        patch: Value,
        best_effort: bool,
    },
    Delete(ResourceRef),
}

impl StepAction {
    pub fn target(&self) -> &ResourceRef {
        match self {
            StepAction::Apply(m) => &m.resource,
            StepAction::Patch { target, .. } => target,
            StepAction::Delete(r) => r,
        }
    }
}

/// "Write these resources, then wait for that condition."
#[derive(Clone, Debug)]
pub struct Step {
    pub name: String,
    pub actions: Vec<StepAction>,
    pub awaits: Option<PollSpec>,
    pub depends_on: BTreeSet<String>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Step {
        Step {
            name: name.into(),
            actions: Vec::new(),
            awaits: None,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn apply(mut self, manifest: Manifest) -> Step {
        self.actions.push(StepAction::Apply(manifest));
        self
    }

    pub fn patch(mut self, target: ResourceRef, patch: Value, best_effort: bool) -> Step {
        self.actions.push(StepAction::Patch {
            target,
            patch,
            best_effort,
        });
        self
    }

    pub fn delete(mut self, target: ResourceRef) -> Step {
        self.actions.push(StepAction::Delete(target));
        self
    }

    pub fn awaits(mut self, spec: PollSpec) -> Step {
        self.awaits = Some(spec);
        self
    }

    pub fn after(mut self, step: impl Into<String>) -> Step {
        self.depends_on.insert(step.into());
        self
    }

    pub fn manifests(&self) -> impl Iterator<Item = &Manifest> {
        self.actions.iter().filter_map(|a| match a {
            StepAction::Apply(m) => Some(m),
            _ => None,
        })
    }
}

/// Steps in the order they should be started when several are runnable.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Plan {
        Plan::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Reject configuration errors before anything touches the cluster.
    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(Error::invalid_plan(format!("duplicate step '{}'", step.name)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(Error::invalid_plan(format!(
                        "step '{}' depends on itself",
                        step.name
                    )));
                }
                if !names.contains(dep.as_str()) {
                    return Err(Error::invalid_plan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name, dep
                    )));
                }
            }

            // (kind, namespace, name) may only be written once per step.
            let mut seen = HashSet::new();
            for action in &step.actions {
                if !seen.insert(action.target().identity()) {
                    return Err(Error::invalid_plan(format!(
                        "step '{}' writes {} more than once",
                        step.name,
                        action.target()
                    )));
                }
            }

            if let Some(spec) = &step.awaits {
                spec.validate()?;
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm; plan order breaks ties. Fails on a cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>, Error> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            in_degree.insert(&step.name, step.depends_on.len());
            for dep in &step.depends_on {
                dependents.entry(dep.as_str()).or_default().push(&step.name);
            }
        }

        let mut ready: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.name.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(name) = ready.pop_front() {
            order.push(name);
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| *n)
                .collect();
            stuck.sort();
            return Err(Error::invalid_plan(format!(
                "dependency cycle between steps: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}
