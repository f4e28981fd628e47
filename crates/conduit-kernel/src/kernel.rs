//! ConduitKernel: assembles config, injectors, policy engine, adapter and
//! workflow coordinator into one handle.

use crate::config::{load_config, try_load_config};
use crate::error::{KernelError, KernelResult};
use crate::workflow::{CompensatingAction, WorkflowCoordinator};
use conduit_runtime::injector::builtin;
use conduit_runtime::{ContextInjector, ErrorPolicyEngine, FallbackSource, InjectorRegistry, ProtocolAdapter};
use conduit_types::config::ConduitConfig;
use conduit_types::workflow::WorkflowDefinition;
use conduit_wire::{Direction, Subject, TransportRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The assembled runtime. Everything inside is immutable after boot.
#[derive(Clone)]
pub struct ConduitKernel {
    config: ConduitConfig,
    adapter: ProtocolAdapter,
    coordinator: WorkflowCoordinator,
}

/// Collects the pieces that do not come from config.
pub struct ConduitKernelBuilder {
    config: ConduitConfig,
    injectors: Vec<(String, Arc<dyn ContextInjector>)>,
    definitions: Vec<WorkflowDefinition>,
    compensators: Vec<(String, Arc<dyn CompensatingAction>)>,
    fallback: Option<Arc<dyn FallbackSource>>,
}

impl ConduitKernelBuilder {
    /// Injector for `service`. Overrides the one named in config.
    pub fn injector(mut self, service: impl Into<String>, injector: Arc<dyn ContextInjector>) -> Self {
        self.injectors.push((service.into(), injector));
        self
    }

    pub fn definition(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn compensator(mut self, name: impl Into<String>, action: Arc<dyn CompensatingAction>) -> Self {
        self.compensators.push((name.into(), action));
        self
    }

    /// Fallback source for `best_effort` calls.
    pub fn fallback(mut self, source: Arc<dyn FallbackSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub fn boot(self, transports: Arc<dyn TransportRegistry>) -> KernelResult<ConduitKernel> {
        let config = self.config;
        info!(domain = %config.domain, services = config.services.len(), "Booting Conduit kernel");

        let mut injectors = InjectorRegistry::new();
        for service in &config.services {
            if let Some(name) = &service.injector {
                let injector = builtin(name)?;
                debug!(service = %service.name, injector = %name, transport = %service.transport, "Registered injector");
                injectors = injectors.with(service.name.clone(), injector);
            }
        }
        for (service, injector) in self.injectors {
            debug!(service = %service, injector = injector.name(), "Registered custom injector");
            injectors = injectors.with(service, injector);
        }

        let mut engine = ErrorPolicyEngine::new(config.retry.clone());
        if let Some(fallback) = self.fallback {
            engine = engine.with_fallback(fallback);
        }

        let adapter = ProtocolAdapter::new(transports)
            .with_injectors(injectors)
            .with_policy_engine(engine)
            .with_default_policy(config.default_error_policy.clone());

        let mut coordinator = WorkflowCoordinator::builder(adapter.clone());
        for definition in self.definitions {
            coordinator = coordinator.definition(definition);
        }
        for (name, action) in self.compensators {
            coordinator = coordinator.compensator(name, action);
        }
        let coordinator = coordinator.build()?;

        info!(
            default_mode = %config.default_error_policy.mode,
            workflows = coordinator.operations().len(),
            "Conduit kernel booted"
        );
        Ok(ConduitKernel {
            config,
            adapter,
            coordinator,
        })
    }
}

impl ConduitKernel {
    pub fn builder(config: ConduitConfig) -> ConduitKernelBuilder {
        ConduitKernelBuilder {
            config,
            injectors: Vec::new(),
            definitions: Vec::new(),
            compensators: Vec::new(),
            fallback: None,
        }
    }

    /// Boot with only what the config declares.
    pub fn boot(config: ConduitConfig, transports: Arc<dyn TransportRegistry>) -> KernelResult<Self> {
        Self::builder(config).boot(transports)
    }

    /// Load config and boot.
    ///
    /// With `None` the default location is read leniently (missing or broken
    /// files mean defaults). An explicit path must load cleanly.
    pub fn boot_from_path(
        path: Option<&Path>,
        transports: Arc<dyn TransportRegistry>,
    ) -> KernelResult<Self> {
        let config = match path {
            Some(path) => try_load_config(path)
                .map_err(|e| KernelError::BootFailed(format!("{}: {e}", path.display())))?,
            None => load_config(None),
        };
        Self::boot(config, transports)
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    pub fn coordinator(&self) -> &WorkflowCoordinator {
        &self.coordinator
    }

    /// Message-bus subject for `service` in this kernel's domain. Fails for a
    /// service name that cannot be routed as a single subject segment.
    pub fn subject_for(&self, service: &str, direction: Direction) -> KernelResult<Subject> {
        Ok(Subject::new(&self.config.domain, service, direction)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::config::ServiceConfig;
    use conduit_types::workflow::{CompensationSpec, PhaseSpec, StepSpec};
    use conduit_types::TransportKind;
    use conduit_wire::StaticTransportRegistry;

    fn transports() -> Arc<dyn TransportRegistry> {
        Arc::new(StaticTransportRegistry::new())
    }

    #[test]
    fn test_boot_defaults() {
        let kernel = ConduitKernel::boot(ConduitConfig::default(), transports()).unwrap();
        assert_eq!(
            kernel.subject_for("orchestrator", Direction::Request).unwrap().to_string(),
            "mcp.orchestrator.request"
        );
        assert!(kernel.coordinator().operations().is_empty());
        assert!(kernel.subject_for("bad.svc", Direction::Request).is_err());
    }

    #[test]
    fn test_unknown_injector_fails_boot() {
        let mut config = ConduitConfig::default();
        config.services.push(ServiceConfig {
            name: "db".to_string(),
            transport: TransportKind::Rpc,
            injector: Some("oracle".to_string()),
        });
        let err = ConduitKernel::boot(config, transports()).err().unwrap();
        assert_eq!(
            err.as_conduit().map(|e| e.kind()),
            Some(conduit_types::ErrorKind::Config)
        );
    }

    #[test]
    fn test_explicit_missing_config_fails_boot() {
        let err = ConduitKernel::boot_from_path(
            Some(Path::new("/nonexistent/conduit.toml")),
            transports(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, KernelError::BootFailed(_)), "{err}");
    }

    #[test]
    fn test_boot_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                domain = "acme"

                [[services]]
                name = "database"
                transport = "rpc"
                injector = "database"
            "#,
        )
        .unwrap();
        let kernel = ConduitKernel::boot_from_path(Some(&path), transports()).unwrap();
        assert_eq!(kernel.config().domain, "acme");
        assert_eq!(
            kernel.subject_for("database", Direction::Response).unwrap().to_string(),
            "acme.database.response"
        );
    }

    #[test]
    fn test_unregistered_compensator_fails_boot() {
        let def = WorkflowDefinition::new(
            "checkout",
            vec![PhaseSpec::Sequential(
                StepSpec::new("charge", "payments", "charge").with_compensation(
                    CompensationSpec::Named {
                        name: "refund".to_string(),
                    },
                ),
            )],
        );
        let err = ConduitKernel::builder(ConduitConfig::default())
            .definition(def)
            .boot(transports())
            .err()
            .unwrap();
        let conduit = err.as_conduit().unwrap();
        assert_eq!(conduit.kind(), conduit_types::ErrorKind::Config);
    }
}
