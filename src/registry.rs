use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    interceptor::InterceptorPipeline, resolver::ConfigResolver, ApiClient, ApiError, ClientConfig,
    Result,
};

#[derive(Default)]
struct Instances {
    clients: HashMap<String, ApiClient>,
    /// Registration order; the first entry is the default instance.
    order: Vec<String>,
}

struct RegistryInner {
    instances: Mutex<Instances>,
    pipeline: Arc<InterceptorPipeline>,
    resolver: Arc<ConfigResolver>,
}

/// Directory of named [`ApiClient`] instances.
///
/// All instances of one registry share its interceptor pipeline and its
/// resolver caches. Cloning the registry shares the same directory.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("instances", &self.names())
            .field("pipeline", &self.inner.pipeline)
            .finish()
    }
}

impl ClientRegistry {
    /// Creates an empty registry with its own pipeline and resolver.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                instances: Mutex::new(Instances::default()),
                pipeline: Arc::new(InterceptorPipeline::new()),
                resolver: Arc::new(ConfigResolver::new()),
            }),
        }
    }

    /// Returns the instance called `name`, configured with `config`.
    ///
    /// An existing instance whose applied settings equal `config` is
    /// returned untouched. A changed configuration is applied in place, so
    /// handles obtained earlier observe it. A new instance is registered
    /// only once it configured successfully; the first one becomes the
    /// default.
    pub fn init(&self, name: &str, config: &ClientConfig) -> Result<ApiClient> {
        let mut instances = self.inner.instances.lock();
        if let Some(client) = instances.clients.get(name) {
            let client = client.clone();
            if client.configure(config)? {
                tracing::info!(client = name, "client reconfigured");
            }
            return Ok(client);
        }

        let client = ApiClient::with_shared(
            name,
            Arc::clone(&self.inner.pipeline),
            Arc::clone(&self.inner.resolver),
        );
        client.configure(config)?;
        instances.clients.insert(name.to_owned(), client.clone());
        instances.order.push(name.to_owned());
        tracing::info!(client = name, default = instances.order.len() == 1, "client registered");
        Ok(client)
    }

    /// Looks up `name`, or the default instance when `name` is `None`.
    pub fn get(&self, name: Option<&str>) -> Result<ApiClient> {
        let instances = self.inner.instances.lock();
        let key = match name {
            Some(name) => name,
            None => instances
                .order
                .first()
                .map(String::as_str)
                .ok_or(ApiError::NotInitialized { name: None })?,
        };
        instances
            .clients
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::NotInitialized {
                name: Some(key.to_owned()),
            })
    }

    /// Removes one instance, or every instance when `name` is `None`.
    ///
    /// Resetting everything also clears the resolver caches and the shared
    /// interceptor pipeline.
    pub fn reset(&self, name: Option<&str>) -> Result<()> {
        let mut instances = self.inner.instances.lock();
        match name {
            Some(name) => {
                if instances.clients.remove(name).is_none() {
                    return Err(ApiError::NotInitialized {
                        name: Some(name.to_owned()),
                    });
                }
                instances.order.retain(|registered| registered != name);
                tracing::info!(client = name, "client removed");
            }
            None => {
                instances.clients.clear();
                instances.order.clear();
                self.inner.resolver.clear();
                self.inner.pipeline.reset_all();
                tracing::info!("all clients removed");
            }
        }
        Ok(())
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.instances.lock().order.clone()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.inner.instances.lock().clients.len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interceptor pipeline shared by every instance.
    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.inner.pipeline
    }

    /// URL and error-log resolver shared by every instance.
    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.inner.resolver
    }
}
