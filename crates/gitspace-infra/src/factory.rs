//! Provider registry keyed by provider type.
//!
//! The registry is assembled once at startup through [`InfraProviderFactoryBuilder`]
//! and is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use gitspace_store::InfraProviderType;

use crate::provider::InfraProvider;
use crate::{InfraError, Result};

/// Immutable lookup of providers by type.
#[derive(Clone, Default)]
pub struct InfraProviderFactory {
    providers: Arc<HashMap<InfraProviderType, Arc<dyn InfraProvider>>>,
}

impl InfraProviderFactory {
    /// Start assembling a factory.
    #[must_use]
    pub fn builder() -> InfraProviderFactoryBuilder {
        InfraProviderFactoryBuilder::default()
    }

    /// Resolve the provider for a type.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::ProviderNotFound` if nothing is registered for the type.
    pub fn get(&self, provider_type: InfraProviderType) -> Result<Arc<dyn InfraProvider>> {
        self.providers
            .get(&provider_type)
            .cloned()
            .ok_or(InfraError::ProviderNotFound(provider_type))
    }

    /// Registered provider types, sorted.
    #[must_use]
    pub fn provider_types(&self) -> Vec<InfraProviderType> {
        let mut types: Vec<_> = self.providers.keys().copied().collect();
        types.sort();
        types
    }
}

/// Builder for [`InfraProviderFactory`].
#[derive(Default)]
pub struct InfraProviderFactoryBuilder {
    providers: HashMap<InfraProviderType, Arc<dyn InfraProvider>>,
}

impl InfraProviderFactoryBuilder {
    /// Register a provider under its own type, replacing any earlier registration.
    #[must_use]
    pub fn register(mut self, provider: Arc<dyn InfraProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> InfraProviderFactory {
        InfraProviderFactory {
            providers: Arc::new(self.providers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockInfraProvider;
    use crate::sink::ChannelSink;
    use crate::ProvisioningType;

    #[test]
    fn resolves_registered_providers() {
        let (sink, _rx) = ChannelSink::channel();
        let factory = InfraProviderFactory::builder()
            .register(Arc::new(MockInfraProvider::new(
                InfraProviderType::HybridVmGcp,
                ProvisioningType::New,
                Arc::new(sink),
            )))
            .build();

        let provider = factory.get(InfraProviderType::HybridVmGcp).unwrap();
        assert_eq!(provider.provisioning_type(), ProvisioningType::New);
        assert_eq!(factory.provider_types(), vec![InfraProviderType::HybridVmGcp]);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let factory = InfraProviderFactory::builder().build();
        let result = factory.get(InfraProviderType::Docker);
        assert!(matches!(
            result,
            Err(InfraError::ProviderNotFound(InfraProviderType::Docker))
        ));
    }
}
