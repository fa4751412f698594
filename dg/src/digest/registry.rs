//! DigesterRegistry - ordered, append-only table of digesters

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::traits::Digester;

/// Errors from registering digesters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Digester already registered: {0}")]
    DuplicateName(String),

    #[error("Output '{output}' of digester '{digester}' is already registered")]
    DuplicateOutput { digester: String, output: String },

    #[error("Digester '{digester}' reads '{upstream}', which is not registered before it")]
    UpstreamNotRegistered { digester: String, upstream: String },
}

/// Introspection entry for one registered digester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigesterInfo {
    pub name: String,
    pub label: String,
    pub description: String,
    pub outputs: Vec<String>,
    pub upstreams: Vec<String>,
}

/// Registered digesters in execution order
#[derive(Default, Clone)]
pub struct DigesterRegistry {
    digesters: Vec<Arc<dyn Digester>>,
}

impl DigesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a digester. Names, output names and upstream order are checked.
    pub fn register(&mut self, digester: Arc<dyn Digester>) -> Result<(), RegistryError> {
        let name = digester.name().to_string();
        debug!(%name, "register: called");

        let mut taken: HashSet<String> = HashSet::new();
        for existing in &self.digesters {
            taken.insert(existing.name().to_string());
            taken.extend(existing.output_names());
        }

        if taken.contains(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let mut own = HashSet::new();
        for output in digester.output_names() {
            if taken.contains(&output) || !own.insert(output.clone()) {
                return Err(RegistryError::DuplicateOutput { digester: name, output });
            }
        }

        let registered_outputs = self.all_digest_types();
        for upstream in digester.upstreams() {
            if !registered_outputs.contains(&upstream) {
                return Err(RegistryError::UpstreamNotRegistered {
                    digester: name,
                    upstream,
                });
            }
        }

        info!(%name, outputs = ?digester.output_names(), "Registered digester");
        self.digesters.push(digester);
        Ok(())
    }

    /// Register a set of digesters once. A populated registry is left untouched.
    ///
    /// Returns the number of digesters registered by this call.
    pub fn initialize(&mut self, digesters: impl IntoIterator<Item = Arc<dyn Digester>>) -> Result<usize, RegistryError> {
        if !self.is_empty() {
            debug!(count = self.count(), "initialize: registry already populated, skipping");
            return Ok(0);
        }

        let mut added = 0;
        for digester in digesters {
            self.register(digester)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Digester>> {
        self.digesters.iter().find(|d| d.name() == name)
    }

    /// Digesters in registration order
    pub fn digesters(&self) -> &[Arc<dyn Digester>] {
        &self.digesters
    }

    /// Every output name in registration order
    pub fn all_digest_types(&self) -> Vec<String> {
        self.digesters.iter().flat_map(|d| d.output_names()).collect()
    }

    pub fn count(&self) -> usize {
        self.digesters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digesters.is_empty()
    }

    pub fn info(&self) -> Vec<DigesterInfo> {
        self.digesters
            .iter()
            .map(|d| DigesterInfo {
                name: d.name().to_string(),
                label: d.label().to_string(),
                description: d.description().to_string(),
                outputs: d.output_names(),
                upstreams: d.upstreams(),
            })
            .collect()
    }
}

impl std::fmt::Debug for DigesterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigesterRegistry")
            .field("digesters", &self.digesters.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestContext, DigestError, DigestOutput};
    use async_trait::async_trait;
    use digeststore::FileRecord;

    struct Stub {
        name: &'static str,
        outputs: Vec<&'static str>,
        upstreams: Vec<&'static str>,
    }

    fn stub(name: &'static str) -> Arc<dyn Digester> {
        Arc::new(Stub {
            name,
            outputs: vec![],
            upstreams: vec![],
        })
    }

    #[async_trait]
    impl Digester for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn output_names(&self) -> Vec<String> {
            if self.outputs.is_empty() {
                vec![self.name.to_string()]
            } else {
                self.outputs.iter().map(|s| s.to_string()).collect()
            }
        }

        fn upstreams(&self) -> Vec<String> {
            self.upstreams.iter().map(|s| s.to_string()).collect()
        }

        fn can_digest(&self, _file_path: &str, _file: &FileRecord) -> bool {
            true
        }

        async fn digest(&self, _ctx: &DigestContext<'_>) -> Result<Vec<DigestOutput>, DigestError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_register_preserves_order() {
        let mut registry = DigesterRegistry::new();
        registry.register(stub("a")).unwrap();
        registry.register(stub("b")).unwrap();
        registry
            .register(Arc::new(Stub {
                name: "speakers",
                outputs: vec!["speaker-ids", "speaker-names"],
                upstreams: vec!["a"],
            }))
            .unwrap();

        assert_eq!(registry.count(), 3);
        assert_eq!(
            registry.all_digest_types(),
            vec!["a", "b", "speaker-ids", "speaker-names"]
        );
        assert!(registry.get("speakers").is_some());
        assert!(registry.get("speaker-ids").is_none());
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut registry = DigesterRegistry::new();
        registry.register(stub("a")).unwrap();
        assert_eq!(
            registry.register(stub("a")),
            Err(RegistryError::DuplicateName("a".to_string()))
        );
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_register_rejects_colliding_output() {
        let mut registry = DigesterRegistry::new();
        registry.register(stub("a")).unwrap();
        let result = registry.register(Arc::new(Stub {
            name: "multi",
            outputs: vec!["x", "a"],
            upstreams: vec![],
        }));
        assert!(matches!(result, Err(RegistryError::DuplicateOutput { .. })));
    }

    #[test]
    fn test_register_requires_upstream_first() {
        let mut registry = DigesterRegistry::new();
        let result = registry.register(Arc::new(Stub {
            name: "b",
            outputs: vec![],
            upstreams: vec!["a"],
        }));
        assert!(matches!(result, Err(RegistryError::UpstreamNotRegistered { .. })));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut registry = DigesterRegistry::new();
        assert_eq!(registry.initialize(vec![stub("a"), stub("b")]).unwrap(), 2);
        assert_eq!(registry.initialize(vec![stub("a"), stub("b")]).unwrap(), 0);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_info() {
        let mut registry = DigesterRegistry::new();
        registry.register(stub("a")).unwrap();
        let info = registry.info();
        assert_eq!(info[0].name, "a");
        assert_eq!(info[0].label, "a");
        assert_eq!(info[0].outputs, vec!["a"]);
    }
}
