use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use {
    anyhow::{Result, bail},
    tracing::{error, info, warn},
};

use omnigate_config::GatewayConfig;

use crate::plugin::ChannelPlugin;

/// Registry of all loaded channel adapters, keyed by channel tag.
///
/// The plugin map is fixed after boot; only the initialized-set changes, at
/// `initialize_all` and `shutdown_all`.
pub struct ChannelRegistry {
    plugins: HashMap<String, Arc<dyn ChannelPlugin>>,
    initialized: RwLock<HashSet<String>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            initialized: RwLock::new(HashSet::new()),
        }
    }

    /// Register an adapter. A second adapter under the same tag is a boot
    /// error, not a silent replacement.
    pub fn register(&mut self, plugin: Arc<dyn ChannelPlugin>) -> Result<()> {
        let tag = plugin.channel().to_string();
        if self.plugins.contains_key(&tag) {
            bail!("duplicate channel adapter: {tag}");
        }
        self.plugins.insert(tag, plugin);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelPlugin>> {
        self.plugins.get(channel).cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn ChannelPlugin>> {
        self.plugins.values().cloned().collect()
    }

    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_initialized(&self, channel: &str) -> bool {
        self.initialized
            .read()
            .map(|set| set.contains(channel))
            .unwrap_or(false)
    }

    /// Adapters that are both configured and successfully initialized.
    #[must_use]
    pub fn active(&self, cfg: &GatewayConfig) -> Vec<Arc<dyn ChannelPlugin>> {
        self.plugins
            .values()
            .filter(|p| p.is_configured(cfg) && self.is_initialized(p.channel()))
            .cloned()
            .collect()
    }

    /// Initialize every configured adapter.
    ///
    /// Individual failures are logged and skipped; boot only aborts when not
    /// a single adapter came up.
    pub async fn initialize_all(&self, cfg: &GatewayConfig) -> Result<usize> {
        let mut started = 0usize;
        let mut configured = 0usize;

        for plugin in self.plugins.values() {
            if !plugin.is_configured(cfg) {
                info!(channel = plugin.channel(), "adapter not configured, skipping");
                continue;
            }
            configured += 1;
            match plugin.initialize(cfg).await {
                Ok(()) => {
                    info!(channel = plugin.channel(), name = plugin.display_name(), "adapter initialized");
                    if let Ok(mut set) = self.initialized.write() {
                        set.insert(plugin.channel().to_string());
                    }
                    started += 1;
                },
                Err(e) => {
                    error!(channel = plugin.channel(), error = %e, "adapter failed to initialize");
                },
            }
        }

        if configured > 0 && started == 0 {
            bail!("no channel adapter initialized ({configured} configured)");
        }
        if configured == 0 {
            warn!("no channel adapters configured");
        }
        Ok(started)
    }

    /// Shut down every initialized adapter and clear the initialized set.
    pub async fn shutdown_all(&self) {
        let tags: Vec<String> = {
            match self.initialized.read() {
                Ok(set) => set.iter().cloned().collect(),
                Err(_) => Vec::new(),
            }
        };
        for tag in tags {
            if let Some(plugin) = self.plugins.get(&tag) {
                info!(channel = %tag, "shutting down adapter");
                plugin.shutdown().await;
            }
        }
        if let Ok(mut set) = self.initialized.write() {
            set.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::plugin::{WebhookRequest, WebhookResponse}, async_trait::async_trait};

    use omnigate_common::DeliveryParams;

    struct FakePlugin {
        tag: &'static str,
        configured: bool,
        fail_init: bool,
    }

    #[async_trait]
    impl ChannelPlugin for FakePlugin {
        fn channel(&self) -> &'static str {
            self.tag
        }

        fn display_name(&self) -> &str {
            "Fake"
        }

        fn is_configured(&self, _cfg: &GatewayConfig) -> bool {
            self.configured
        }

        async fn initialize(&self, _cfg: &GatewayConfig) -> Result<()> {
            if self.fail_init {
                bail!("credentials rejected");
            }
            Ok(())
        }

        async fn handle_webhook(&self, _req: WebhookRequest) -> WebhookResponse {
            WebhookResponse::ok_empty()
        }

        async fn deliver(&self, _params: &DeliveryParams) -> bool {
            true
        }

        async fn shutdown(&self) {}
    }

    fn plugin(tag: &'static str, configured: bool, fail_init: bool) -> Arc<dyn ChannelPlugin> {
        Arc::new(FakePlugin {
            tag,
            configured,
            fail_init,
        })
    }

    #[test]
    fn duplicate_tag_is_an_error() {
        let mut reg = ChannelRegistry::new();
        reg.register(plugin("slack", true, false)).unwrap();
        assert!(reg.register(plugin("slack", true, false)).is_err());
    }

    #[tokio::test]
    async fn one_failing_adapter_does_not_abort_boot() {
        let mut reg = ChannelRegistry::new();
        reg.register(plugin("good", true, false)).unwrap();
        reg.register(plugin("bad", true, true)).unwrap();

        let started = reg.initialize_all(&GatewayConfig::default()).await.unwrap();
        assert_eq!(started, 1);
        assert!(reg.is_initialized("good"));
        assert!(!reg.is_initialized("bad"));
    }

    #[tokio::test]
    async fn all_adapters_failing_aborts_boot() {
        let mut reg = ChannelRegistry::new();
        reg.register(plugin("bad", true, true)).unwrap();
        assert!(reg.initialize_all(&GatewayConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_adapters_are_skipped() {
        let mut reg = ChannelRegistry::new();
        reg.register(plugin("idle", false, false)).unwrap();
        reg.register(plugin("live", true, false)).unwrap();

        let cfg = GatewayConfig::default();
        reg.initialize_all(&cfg).await.unwrap();

        let active = reg.active(&cfg);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].channel(), "live");
    }

    #[tokio::test]
    async fn shutdown_clears_initialized_state() {
        let mut reg = ChannelRegistry::new();
        reg.register(plugin("live", true, false)).unwrap();
        reg.initialize_all(&GatewayConfig::default()).await.unwrap();
        assert!(reg.is_initialized("live"));

        reg.shutdown_all().await;
        assert!(!reg.is_initialized("live"));
    }
}
