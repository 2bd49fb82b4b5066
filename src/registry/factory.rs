use crate::config::Config;
use crate::error::Result;
use crate::nuget::NugetRegistry;
use crate::registry::RegistryClient;
use std::sync::Arc;
use std::time::Duration;

pub struct RegistryFactory;

impl RegistryFactory {
    pub fn create_nuget(config: &Config) -> Result<Arc<dyn RegistryClient>> {
        let client = NugetRegistry::with_base_url(
            &config.registry_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Arc::new(client))
    }
}
