//! Registry of supervised services, keyed by opaque id
//!
//! This is the control surface callers drive: add/remove/reload services and
//! start, stop or inspect them by id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::events::EventPublisher;
use crate::family::{FamilyStrategy, ProcessFamily};
use crate::groups::ResolvedService;
use crate::runner::RunnerContext;
use crate::service::{Service, ServiceInfo};
use crate::types::{ServiceConfig, ServiceEnv};

/// Maps a configured service type to its family strategy
pub type FamilyFactory = Arc<dyn Fn(&str) -> Arc<dyn FamilyStrategy> + Send + Sync>;

/// New random service id: 32 lowercase hex characters
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Owns every [`Service`] and routes control calls to it
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    context: Arc<RunnerContext>,
    publisher: Arc<dyn EventPublisher>,
    families: FamilyFactory,
}

impl ServiceRegistry {
    pub fn new(context: Arc<RunnerContext>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            context,
            publisher,
            families: Arc::new(|service_type| ProcessFamily::from_type(service_type).strategy()),
        }
    }

    /// Replace how service types map to families
    pub fn with_families(mut self, families: FamilyFactory) -> Self {
        self.families = families;
        self
    }

    /// Add a service under a fresh id and return the id
    pub fn add(&self, config: ServiceConfig, inherited_env: ServiceEnv) -> String {
        let id = generate_id();
        self.insert(id.clone(), config, inherited_env);
        id
    }

    /// Stop a service's child if it has one and drop the service
    pub async fn remove(&self, id: &str) -> Result<()> {
        let service = self
            .services
            .write()
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        info!(service_id = %id, "Removing service");
        service.shutdown().await
    }

    /// Bring the registry in line with a freshly loaded configuration.
    ///
    /// Services missing from `resolved` are removed, existing ones are
    /// updated in place and new ones are created under their configured id.
    /// A service whose family changed is recreated.
    pub async fn reload(&self, resolved: HashMap<String, ResolvedService>) -> Result<()> {
        let stale: Vec<Arc<Service>> = {
            let mut services = self.services.write();
            let gone: Vec<String> = services
                .keys()
                .filter(|id| !resolved.contains_key(*id))
                .cloned()
                .collect();
            gone.iter().filter_map(|id| services.remove(id)).collect()
        };

        let mut first_error = None;
        for service in stale {
            debug!(service_id = %service.id(), "Service no longer configured");
            if let Err(e) = service.shutdown().await {
                warn!(service_id = %service.id(), error = %e, "Failed to stop removed service");
                first_error.get_or_insert(e);
            }
        }

        for (id, entry) in resolved {
            if let Err(e) = self
                .update_or_insert(&id, entry.config, entry.inherited_env)
                .await
            {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.get(id)?.start().await
    }

    pub async fn start_without_build(&self, id: &str) -> Result<()> {
        self.get(id)?.start_without_build().await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.get(id)?.stop().await
    }

    /// Replace a service's config; takes effect on its next start
    pub async fn update_config(
        &self,
        id: &str,
        config: ServiceConfig,
        inherited_env: ServiceEnv,
    ) -> Result<()> {
        self.get(id)?;
        self.update_or_insert(id, config, inherited_env).await
    }

    pub fn clear_logs(&self, id: &str) -> Result<()> {
        self.get(id)?.clear_logs();
        Ok(())
    }

    pub fn get_info(&self, id: &str) -> Result<ServiceInfo> {
        Ok(self.get(id)?.info())
    }

    /// Snapshots of every service, ordered by name then id
    pub fn list(&self) -> Vec<ServiceInfo> {
        let mut infos: Vec<ServiceInfo> = self.services.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn ids(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Shut every service down, e.g. when the supervisor exits
    pub async fn shutdown_all(&self) {
        let services: Vec<Arc<Service>> = self.services.write().drain().map(|(_, s)| s).collect();
        for service in services {
            if let Err(e) = service.shutdown().await {
                warn!(service_id = %service.id(), error = %e, "Failed to stop service on shutdown");
            }
        }
    }

    fn get(&self, id: &str) -> Result<Arc<Service>> {
        self.services
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn insert(&self, id: String, config: ServiceConfig, inherited_env: ServiceEnv) -> Arc<Service> {
        let family = (self.families)(&config.service_type);
        let service = Arc::new(Service::with_family(
            id.clone(),
            config,
            inherited_env,
            family,
            self.context.clone(),
            self.publisher.clone(),
        ));
        debug!(service_id = %id, "Service registered");
        self.services.write().insert(id, service.clone());
        service
    }

    async fn update_or_insert(
        &self,
        id: &str,
        config: ServiceConfig,
        inherited_env: ServiceEnv,
    ) -> Result<()> {
        let existing = self.services.read().get(id).cloned();
        let Some(existing) = existing else {
            self.insert(id.to_string(), config, inherited_env);
            return Ok(());
        };

        let family = (self.families)(&config.service_type);
        if family.name() == existing.family().name() {
            existing.update_config(config, inherited_env).await;
            return Ok(());
        }

        info!(
            service_id = %id,
            from = existing.family().name(),
            to = family.name(),
            "Service family changed, recreating"
        );
        self.services.write().remove(id);
        let stopped = existing.shutdown().await;
        self.insert(id.to_string(), config, inherited_env);
        stopped
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

fn not_found(id: &str) -> SupervisorError {
    SupervisorError::NotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventPublisher;
    use crate::types::ServiceStatus;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(
            Arc::new(RunnerContext::default()),
            Arc::new(NoOpEventPublisher),
        )
    }

    fn resolved(name: &str, service_type: &str, inherited: &[(&str, &str)]) -> ResolvedService {
        ResolvedService {
            group_id: "g1".to_string(),
            config: ServiceConfig::new(name, format!("/srv/{name}"), service_type),
            inherited_env: inherited
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_generated_ids_are_32_hex_chars() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_id());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = registry();

        assert!(matches!(
            registry.start("missing").await,
            Err(SupervisorError::NotFound { .. })
        ));
        assert!(matches!(
            registry.get_info("missing"),
            Err(SupervisorError::NotFound { .. })
        ));
        assert!(matches!(
            registry.remove("missing").await,
            Err(SupervisorError::NotFound { .. })
        ));
        assert!(matches!(
            registry
                .update_config("missing", ServiceConfig::new("x", "/x", ""), ServiceEnv::new())
                .await,
            Err(SupervisorError::NotFound { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = registry();
        let id = registry.add(ServiceConfig::new("api", "/srv/api", "dotnet"), ServiceEnv::new());

        let info = registry.get_info(&id).unwrap();
        assert_eq!(info.id, id);
        assert_eq!(info.name, "api");
        assert_eq!(info.status, ServiceStatus::Stopped);

        registry.remove(&id).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reload_reconciles_services() {
        let registry = registry();
        let mut first = HashMap::new();
        first.insert("a".to_string(), resolved("api", "dotnet", &[("X", "1")]));
        first.insert("b".to_string(), resolved("web", "npm", &[]));
        registry.reload(first).await.unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["api", "web"]);

        let mut second = HashMap::new();
        second.insert("a".to_string(), resolved("api-renamed", "dotnet", &[("X", "2")]));
        second.insert("c".to_string(), resolved("worker", "", &[]));
        registry.reload(second).await.unwrap();

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);

        let api = registry.get_info("a").unwrap();
        assert_eq!(api.name, "api-renamed");
        assert_eq!(api.inherited_env["X"], "2");
    }

    #[tokio::test]
    async fn test_family_change_recreates_service() {
        let registry = registry();
        let id = registry.add(ServiceConfig::new("app", "/srv/app", "dotnet"), ServiceEnv::new());

        registry
            .update_config(&id, ServiceConfig::new("app", "/srv/app", "npm"), ServiceEnv::new())
            .await
            .unwrap();

        let info = registry.get_info(&id).unwrap();
        assert_eq!(info.service_type, "npm");
        assert_eq!(registry.get(&id).unwrap().family().name(), "npm");
    }
}
