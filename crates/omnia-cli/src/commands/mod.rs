pub mod dlq;
pub mod resync;
pub mod rollout;
pub mod status;

/// Shared `<namespace>/<name>` argument parsing (spec.md §3: objects are
/// addressed by `(kind, namespace, name)`; cluster-scoped kinds use an empty
/// namespace, written as a bare `/name`).
#[derive(Debug, Clone)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl std::str::FromStr for NamespacedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !name.is_empty() => {
                Ok(NamespacedName { namespace: namespace.to_string(), name: name.to_string() })
            }
            Some(_) => Err(format!("invalid object reference {s:?}: name cannot be empty")),
            None => Ok(NamespacedName { namespace: String::new(), name: s.to_string() }),
        }
    }
}
