use crate::domain::{TtlSpec, physical_key};
use crate::ports::{CacheCodec, JsonCodec, NodeConnection, NodeConnector};
use crate::ring::{HashRing, SharedRing};
use arc_swap::ArcSwap;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::{NodeDescriptor, ProviderConfig};
use shared::{Error, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-provider settings. Swapped as a whole by the setters so an operation
/// always sees one consistent set.
#[derive(Clone, Debug)]
struct Settings {
    namespace: String,
    default_ttl_secs: Option<u64>,
    connect_timeout: Duration,
}

struct Inner<C> {
    ring: SharedRing,
    settings: ArcSwap<Settings>,
    connector: Arc<dyn NodeConnector>,
    codec: C,
}

/// Sharded cache facade.
///
/// Namespaces keys, resolves TTLs, picks a node from the ring and runs each
/// operation over its own connection to that node. Cloning is cheap and
/// clones share ring, settings and connector.
pub struct CacheProvider<C = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for CacheProvider<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CacheProvider<JsonCodec> {
    pub fn new(config: ProviderConfig, connector: Arc<dyn NodeConnector>) -> Result<Self> {
        Self::with_codec(config, connector, JsonCodec)
    }
}

impl<C: CacheCodec> CacheProvider<C> {
    pub fn with_codec(
        config: ProviderConfig,
        connector: Arc<dyn NodeConnector>,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        let settings = Settings {
            namespace: config.namespace.clone(),
            default_ttl_secs: config.default_ttl_secs,
            connect_timeout: config.connect_timeout(),
        };
        let ring = HashRing::build(config.nodes, config.virtual_replicas)?;

        Ok(Self {
            inner: Arc::new(Inner {
                ring: SharedRing::new(ring),
                settings: ArcSwap::from_pointee(settings),
                connector,
                codec,
            }),
        })
    }

    /// Store `value` under `key`.
    ///
    /// `ttl` accepts a [`TtlSpec`], a `Duration`, a seconds count, or a bool
    /// selecting the configured default TTL.
    pub async fn add<V>(&self, key: &str, value: &V, ttl: impl Into<TtlSpec>) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let bytes = self.inner.codec.encode(value)?;
        self.add_bytes(key, bytes, ttl.into()).await
    }

    pub(crate) fn codec(&self) -> &C {
        &self.inner.codec
    }

    pub(crate) async fn add_bytes(&self, key: &str, value: Bytes, ttl: TtlSpec) -> Result<()> {
        let settings = self.inner.settings.load_full();
        let ttl = ttl.resolve(settings.default_ttl_secs);
        let physical = physical_key(&settings.namespace, key);
        let node = self.locate(key)?;

        let mut conn = self.open(&node, &settings).await?;
        let result = conn.add(&physical, value, ttl).await;
        release(&node, conn).await;
        result
    }

    /// Fetch `key`, yielding `T::default()` on a miss.
    ///
    /// A miss and a stored default value look the same here; use
    /// [`try_get`](Self::try_get) to tell them apart.
    pub async fn get<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.try_get(key).await?.unwrap_or_default())
    }

    /// Fetch `key`. `Ok(None)` means the node answered and the key was
    /// absent; node failures are returned as errors.
    pub async fn try_get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.fetch(key).await? {
            Some(bytes) => self.inner.codec.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch each key in turn. Missing keys are left out of the result.
    pub async fn get_many<T, I, K>(&self, keys: I) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut found = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.try_get(key).await? {
                found.insert(key.to_string(), value);
            }
        }
        Ok(found)
    }

    /// Delete `key`. Deleting an absent key is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let settings = self.inner.settings.load_full();
        let physical = physical_key(&settings.namespace, key);
        let node = self.locate(key)?;

        let mut conn = self.open(&node, &settings).await?;
        let result = conn.remove(&physical).await;
        release(&node, conn).await;
        let existed = result?;
        debug!(node = %node, key = %physical, existed, "removed key");
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        let settings = self.inner.settings.load_full();
        let physical = physical_key(&settings.namespace, key);
        let node = self.locate(key)?;

        let mut conn = self.open(&node, &settings).await?;
        let result = conn.get(&physical).await;
        release(&node, conn).await;
        result
    }

    async fn open(
        &self,
        node: &NodeDescriptor,
        settings: &Settings,
    ) -> Result<Box<dyn NodeConnection>> {
        let timeout = settings.connect_timeout;
        match tokio::time::timeout(timeout, self.inner.connector.connect(node, timeout)).await {
            Ok(conn) => conn,
            Err(_) => Err(Error::node(
                node.id(),
                format!("connect timed out after {}ms", timeout.as_millis()),
            )),
        }
    }
}

impl<C> CacheProvider<C> {
    /// The node currently responsible for `key`.
    pub fn locate(&self, key: &str) -> Result<Arc<NodeDescriptor>> {
        let node = self.inner.ring.locate(key)?;
        debug!(key, node = %node, "located node");
        Ok(node)
    }

    pub fn nodes(&self) -> Vec<Arc<NodeDescriptor>> {
        self.inner.ring.snapshot().nodes().to_vec()
    }

    /// Put a node on the ring. Returns `false` if it was already there.
    pub fn add_node(&self, node: NodeDescriptor) -> Result<bool> {
        node.validate()?;
        self.inner.ring.add_node(node)
    }

    /// Take a node off the ring. Returns `false` if it was not there.
    pub fn remove_node(&self, node_id: &str) -> bool {
        self.inner.ring.remove_node(node_id)
    }

    pub fn namespace(&self) -> String {
        self.inner.settings.load().namespace.clone()
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        self.update_settings(|s| s.namespace = namespace.clone());
    }

    pub fn default_ttl_secs(&self) -> Option<u64> {
        self.inner.settings.load().default_ttl_secs
    }

    pub fn set_default_ttl_secs(&self, secs: u64) {
        self.update_settings(|s| s.default_ttl_secs = Some(secs));
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        u64::try_from(self.inner.settings.load().connect_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn set_connect_timeout_ms(&self, ms: u64) {
        self.update_settings(|s| s.connect_timeout = Duration::from_millis(ms));
    }

    fn update_settings(&self, mut apply: impl FnMut(&mut Settings)) {
        self.inner.settings.rcu(|current| {
            let mut next = Settings::clone(current);
            apply(&mut next);
            next
        });
    }
}

impl<C> Debug for CacheProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("settings", &self.inner.settings.load())
            .field("nodes", &self.inner.ring.snapshot().node_count())
            .finish()
    }
}

async fn release(node: &NodeDescriptor, conn: Box<dyn NodeConnection>) {
    if let Err(e) = conn.close().await {
        warn!(node = %node, error = %e, "failed to close node connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConnector;
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: u64,
        name: String,
    }

    fn nodes() -> Vec<NodeDescriptor> {
        vec![
            NodeDescriptor::new("10.0.0.1", 6379),
            NodeDescriptor::new("10.0.0.2", 6379),
            NodeDescriptor::new("10.0.0.3", 6379),
        ]
    }

    fn provider(connector: &Arc<RecordingConnector>, namespace: &str) -> CacheProvider {
        let config = ProviderConfig::new(nodes())
            .with_namespace(namespace)
            .with_default_ttl_secs(3600);
        CacheProvider::new(config, connector.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_topology() {
        let connector = Arc::new(RecordingConnector::default());
        let err = CacheProvider::new(ProviderConfig::new(Vec::new()), connector).unwrap_err();
        assert!(matches!(err, Error::EmptyTopology));
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        let payload = Payload {
            id: 1001,
            name: "order".into(),
        };

        cache.add("orders:1001", &payload, Duration::from_secs(300)).await.unwrap();
        let fetched: Payload = cache.get("orders:1001").await.unwrap();
        assert_eq!(fetched, payload);

        let node = cache.locate("orders:1001").unwrap();
        let (_, ttl) = connector.entry(&node.id(), "_svc1_orders:1001").unwrap();
        assert_eq!(ttl, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_get_miss_returns_default() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");

        let value: Payload = cache.get("missing").await.unwrap();
        assert_eq!(value, Payload::default());
        let count: u32 = cache.get("missing").await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_try_get_reports_presence() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");

        cache.add("zero", &0u32, true).await.unwrap();
        assert_eq!(cache.try_get::<u32>("zero").await.unwrap(), Some(0));
        assert_eq!(cache.try_get::<u32>("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_try_get_distinguishes_miss_from_node_failure() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        let node = cache.locate("k").unwrap();
        connector.fail_node(&node.id());

        let err = cache.try_get::<String>("k").await.unwrap_err();
        assert!(matches!(err, Error::NodeCommunication { .. }));
        assert!(cache.get::<String>("k").await.is_err());
        assert!(cache.add("k", "v", true).await.is_err());
        assert!(cache.remove("k").await.is_err());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let connector = Arc::new(RecordingConnector::default());
        let svc1 = provider(&connector, "svc1");
        let svc2 = provider(&connector, "svc2");

        svc1.add("k", "v1", true).await.unwrap();
        svc2.add("k", "v2", true).await.unwrap();

        assert_eq!(svc1.get::<String>("k").await.unwrap(), "v1");
        assert_eq!(svc2.get::<String>("k").await.unwrap(), "v2");

        let node = svc1.locate("k").unwrap().id();
        assert!(connector.entry(&node, "_svc1_k").is_some());
        assert!(connector.entry(&node, "_svc2_k").is_some());

        svc1.remove("k").await.unwrap();
        assert_eq!(svc1.try_get::<String>("k").await.unwrap(), None);
        assert_eq!(svc2.get::<String>("k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_ttl_precedence() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        let ttl_of = |key: &str| {
            let node = cache.locate(key).unwrap().id();
            connector.entry(&node, &physical_key("svc1", key)).unwrap().1
        };

        cache.add("configured", "v", true).await.unwrap();
        cache.add("fallback", "v", false).await.unwrap();
        cache.add("bare", "v", TtlSpec::default()).await.unwrap();
        cache.add("seconds", "v", 45u64).await.unwrap();
        cache
            .add(
                "explicit",
                "v",
                TtlSpec::duration(Duration::from_secs(120)).with_default_flag(true),
            )
            .await
            .unwrap();
        cache
            .add(
                "explicit-no-default",
                "v",
                TtlSpec::duration(Duration::from_secs(120)).with_default_flag(false),
            )
            .await
            .unwrap();

        assert_eq!(ttl_of("configured"), Duration::from_secs(3600));
        assert_eq!(ttl_of("fallback"), Duration::from_secs(60));
        assert_eq!(ttl_of("bare"), Duration::from_secs(60));
        assert_eq!(ttl_of("seconds"), Duration::from_secs(45));
        assert_eq!(ttl_of("explicit"), Duration::from_secs(120));
        assert_eq!(ttl_of("explicit-no-default"), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_default_flag_without_configured_default() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = CacheProvider::new(ProviderConfig::new(nodes()), connector.clone()).unwrap();

        cache.add("k", "v", true).await.unwrap();
        let node = cache.locate("k").unwrap().id();
        assert_eq!(
            connector.entry(&node, "_default_k").unwrap().1,
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_get_many_partial_miss() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        cache.add("k1", "one", true).await.unwrap();
        cache.add("k3", "three", true).await.unwrap();

        let found: HashMap<String, String> =
            cache.get_many(["k1", "k2", "k3"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["k1"], "one");
        assert_eq!(found["k3"], "three");
        assert!(!found.contains_key("k2"));
    }

    #[tokio::test]
    async fn test_one_connection_per_operation_always_closed() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");

        cache.add("a", "1", true).await.unwrap();
        cache.get::<String>("a").await.unwrap();
        cache.try_get::<String>("missing").await.unwrap();
        cache.remove("a").await.unwrap();
        cache.remove("never-added").await.unwrap();
        let _: HashMap<String, String> = cache.get_many(["a", "b", "c"]).await.unwrap();

        // Decode failure on a present key still releases the connection.
        cache.add("num", "not a number", true).await.unwrap();
        assert!(matches!(cache.try_get::<u64>("num").await, Err(Error::Codec(_))));

        assert_eq!(connector.opened(), 10);
        assert_eq!(connector.closed(), 10);
    }

    #[tokio::test]
    async fn test_setters_apply_to_later_operations() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        cache.add("k", "before", true).await.unwrap();

        cache.set_namespace("svc9");
        cache.set_default_ttl_secs(10);
        cache.set_connect_timeout_ms(25);
        assert_eq!(cache.namespace(), "svc9");
        assert_eq!(cache.default_ttl_secs(), Some(10));
        assert_eq!(cache.connect_timeout_ms(), 25);

        assert_eq!(cache.try_get::<String>("k").await.unwrap(), None);
        cache.add("k", "after", true).await.unwrap();
        let node = cache.locate("k").unwrap().id();
        assert_eq!(connector.entry(&node, "_svc9_k").unwrap().1, Duration::from_secs(10));
        assert_eq!(connector.last_timeout(), Some(Duration::from_millis(25)));
    }

    #[tokio::test]
    async fn test_connect_timeout_bounds_slow_nodes() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        cache.set_connect_timeout_ms(20);
        connector.stall_connects(Duration::from_secs(5));

        let started = std::time::Instant::now();
        let err = cache.try_get::<String>("k").await.unwrap_err();
        assert!(matches!(err, Error::NodeCommunication { ref reason, .. } if reason.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_topology_change_keeps_other_keys() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        let keys: Vec<String> = (0..300).map(|i| format!("user:{}", i)).collect();
        let before: Vec<String> = keys.iter().map(|k| cache.locate(k).unwrap().id()).collect();

        assert!(cache.add_node(NodeDescriptor::new("10.0.0.4", 6379)).unwrap());
        assert!(!cache.add_node(NodeDescriptor::new("10.0.0.4", 6379)).unwrap());
        assert!(cache.add_node(NodeDescriptor::new("10.0.0.5", 1).with_weight(0)).is_err());
        assert!(
            cache
                .add_node(NodeDescriptor::new("10.0.0.6", 1).with_weight(1000))
                .is_err()
        );
        assert_eq!(cache.nodes().len(), 4);

        for (key, old) in keys.iter().zip(&before) {
            let new = cache.locate(key).unwrap().id();
            assert!(new == *old || new == "10.0.0.4:6379/0");
        }

        assert!(cache.remove_node("10.0.0.4:6379/0"));
        let after: Vec<String> = keys.iter().map(|k| cache.locate(k).unwrap().id()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_all_nodes_removed() {
        let connector = Arc::new(RecordingConnector::default());
        let cache = provider(&connector, "svc1");
        for node in cache.nodes() {
            cache.remove_node(&node.id());
        }
        assert!(matches!(cache.get::<String>("k").await, Err(Error::NoNodesAvailable)));
        assert_eq!(connector.opened(), 0);
    }
}
