use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Identity of one declarative resource on the cluster.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn namespaced(api_version: &str, kind: &str, namespace: &str, name: &str) -> ResourceRef {
        ResourceRef {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn cluster(api_version: &str, kind: &str, name: &str) -> ResourceRef {
        ResourceRef {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// The (kind, namespace, name) triple that must be unique inside a step.
    pub fn identity(&self) -> (&str, Option<&str>, &str) {
        (&self.kind, self.namespace.as_deref(), &self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Dotted path into an object, e.g. `status.connectionState.lastObservedState`.
/// Numeric segments index into arrays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: &str) -> FieldPath {
        FieldPath(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.0 {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match current {
            Value::Null => None,
            v => Some(v),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}

/// Three-valued result of evaluating a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    /// Resource or field missing. Never an error, just not satisfied yet.
    Unknown,
}

impl Truth {
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    fn from_bool(b: bool) -> Truth {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

type Predicate = Arc<dyn Fn(Option<&Value>) -> Truth + Send + Sync>;

/// A readiness observation over a resource snapshot. Must be side-effect free,
/// the poller may evaluate it any number of times.
#[derive(Clone)]
pub enum Condition {
    FieldEquals { path: FieldPath, expected: String },
    FieldPresent { path: FieldPath },
    #[allow(dead_code)]
    FieldAtLeast { path: FieldPath, min: i64 },
    /// An entry of `status.conditions` with the given type and status.
    StatusCondition { type_: String, status: String },
    /// Satisfied once the resource no longer exists.
    Absent,
    All(Vec<Condition>),
    #[allow(dead_code)]
    Any(Vec<Condition>),
    #[allow(dead_code)]
    Custom(String, Predicate),
}

impl Condition {
    pub fn field_equals(path: &str, expected: &str) -> Condition {
        Condition::FieldEquals {
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn field_present(path: &str) -> Condition {
        Condition::FieldPresent { path: path.into() }
    }

    #[allow(dead_code)]
    pub fn field_at_least(path: &str, min: i64) -> Condition {
        Condition::FieldAtLeast {
            path: path.into(),
            min,
        }
    }

    pub fn status_condition(type_: &str, status: &str) -> Condition {
        Condition::StatusCondition {
            type_: type_.into(),
            status: status.into(),
        }
    }

    #[allow(dead_code)]
    pub fn custom<F>(name: &str, predicate: F) -> Condition
    where
        F: Fn(Option<&Value>) -> Truth + Send + Sync + 'static,
    {
        Condition::Custom(name.into(), Arc::new(predicate))
    }

    /// Evaluate against the observed object, `None` when it does not exist.
    pub fn evaluate(&self, snapshot: Option<&Value>) -> Truth {
        match self {
            Condition::Absent => Truth::from_bool(snapshot.is_none()),
            Condition::Custom(_, predicate) => predicate(snapshot),
            Condition::FieldEquals { path, expected } => {
                match snapshot.and_then(|o| path.lookup(o)) {
                    Some(Value::String(s)) => Truth::from_bool(s == expected),
                    Some(other) => Truth::from_bool(other.to_string() == *expected),
                    None => Truth::Unknown,
                }
            }
            Condition::FieldPresent { path } => match snapshot.and_then(|o| path.lookup(o)) {
                Some(Value::String(s)) if s.is_empty() => Truth::Unknown,
                Some(Value::Object(m)) if m.is_empty() => Truth::Unknown,
                Some(_) => Truth::True,
                None => Truth::Unknown,
            },
            Condition::FieldAtLeast { path, min } => {
                match snapshot.and_then(|o| path.lookup(o)) {
                    Some(v) => match v.as_i64() {
                        Some(n) => Truth::from_bool(n >= *min),
                        None => Truth::False,
                    },
                    None => Truth::Unknown,
                }
            }
            Condition::StatusCondition { type_, status } => {
                let conditions = snapshot.and_then(|o| FieldPath::parse("status.conditions").lookup(o));
                let entry = match conditions {
                    Some(Value::Array(c)) => c
                        .iter()
                        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_.as_str())),
                    _ => None,
                };
                match entry.and_then(|c| c.get("status")).and_then(Value::as_str) {
                    Some(s) => Truth::from_bool(s == status),
                    None => Truth::Unknown,
                }
            }
            Condition::All(conditions) => {
                let mut result = Truth::True;
                for c in conditions {
                    match c.evaluate(snapshot) {
                        Truth::False => return Truth::False,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::True => {}
                    }
                }
                result
            }
            Condition::Any(conditions) => {
                let mut result = Truth::False;
                for c in conditions {
                    match c.evaluate(snapshot) {
                        Truth::True => return Truth::True,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::False => {}
                    }
                }
                result
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Condition::FieldEquals { path, expected } => write!(f, "{}={}", path, expected),
            Condition::FieldPresent { path } => write!(f, "{} present", path),
            Condition::FieldAtLeast { path, min } => write!(f, "{}>={}", path, min),
            Condition::StatusCondition { type_, status } => {
                write!(f, "condition {}={}", type_, status)
            }
            Condition::Absent => write!(f, "absent"),
            Condition::All(c) => {
                let parts: Vec<String> = c.iter().map(|c| c.to_string()).collect();
                write!(f, "all({})", parts.join(", "))
            }
            Condition::Any(c) => {
                let parts: Vec<String> = c.iter().map(|c| c.to_string()).collect();
                write!(f, "any({})", parts.join(", "))
            }
            Condition::Custom(name, _) => write!(f, "{}", name),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Condition({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog(state: &str) -> Value {
        json!({
            "metadata": {"name": "ibm-eventstreams"},
            "status": {"connectionState": {"lastObservedState": state}}
        })
    }

    #[test]
    fn field_equals_reads_nested_paths() {
        let ready = Condition::field_equals("status.connectionState.lastObservedState", "READY");
        assert_eq!(ready.evaluate(Some(&catalog("READY"))), Truth::True);
        assert_eq!(ready.evaluate(Some(&catalog("CONNECTING"))), Truth::False);
    }

    #[test]
    fn missing_resource_or_field_is_unknown() {
        let ready = Condition::field_equals("status.phase", "Ready");
        assert_eq!(ready.evaluate(None), Truth::Unknown);
        assert_eq!(ready.evaluate(Some(&json!({"status": {}}))), Truth::Unknown);
        assert_eq!(ready.evaluate(Some(&json!({"status": {"phase": null}}))), Truth::Unknown);
    }

    #[test]
    fn status_condition_finds_entry_by_type() {
        let obj = json!({"status": {"conditions": [
            {"type": "Pending", "status": "False"},
            {"type": "Ready", "status": "True"}
        ]}});
        assert!(Condition::status_condition("Ready", "True")
            .evaluate(Some(&obj))
            .is_true());
        assert_eq!(
            Condition::status_condition("Warning", "True").evaluate(Some(&obj)),
            Truth::Unknown
        );
    }

    #[test]
    fn numeric_fields_and_array_indexes() {
        let obj = json!({"status": {"readyReplicas": 2, "items": [{"name": "a"}]}});
        assert!(Condition::field_at_least("status.readyReplicas", 1)
            .evaluate(Some(&obj))
            .is_true());
        assert!(Condition::field_equals("status.readyReplicas", "2")
            .evaluate(Some(&obj))
            .is_true());
        assert!(Condition::field_equals("status.items.0.name", "a")
            .evaluate(Some(&obj))
            .is_true());
    }

    #[test]
    fn empty_secret_data_is_not_present() {
        let present = Condition::field_present("data.password");
        assert_eq!(present.evaluate(Some(&json!({"data": {"password": ""}}))), Truth::Unknown);
        assert!(present
            .evaluate(Some(&json!({"data": {"password": "cGFzcw=="}})))
            .is_true());
    }

    #[test]
    fn absent_and_combinators() {
        assert!(Condition::Absent.evaluate(None).is_true());
        assert_eq!(Condition::Absent.evaluate(Some(&json!({}))), Truth::False);

        let obj = json!({"status": {"phase": "Running"}});
        let all = Condition::All(vec![
            Condition::field_equals("status.phase", "Running"),
            Condition::field_present("status.endpoints"),
        ]);
        assert_eq!(all.evaluate(Some(&obj)), Truth::Unknown);
        let any = Condition::Any(vec![
            Condition::field_equals("status.phase", "Ready"),
            Condition::field_equals("status.phase", "Running"),
        ]);
        assert!(any.evaluate(Some(&obj)).is_true());
    }

    #[test]
    fn custom_predicates_see_the_snapshot() {
        let has_two_listeners = Condition::custom("two listeners", |snapshot| {
            match snapshot.and_then(|o| o.pointer("/status/kafkaListeners")) {
                Some(Value::Array(listeners)) if listeners.len() >= 2 => Truth::True,
                Some(_) => Truth::False,
                None => Truth::Unknown,
            }
        });
        let obj = json!({"status": {"kafkaListeners": [{"name": "external"}, {"name": "tls"}]}});
        assert!(has_two_listeners.evaluate(Some(&obj)).is_true());
        assert_eq!(has_two_listeners.evaluate(None), Truth::Unknown);
        assert_eq!(has_two_listeners.to_string(), "two listeners");
    }

    #[test]
    fn resource_ref_display() {
        let r = ResourceRef::namespaced("v1", "Secret", "cp4i", "ibm-entitlement-key");
        assert_eq!(r.to_string(), "Secret/cp4i/ibm-entitlement-key");
        assert_eq!(
            ResourceRef::cluster("v1", "Namespace", "cp4i").to_string(),
            "Namespace/cp4i"
        );
    }
}
