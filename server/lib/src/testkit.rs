//! In-memory collaborators and a ready-made store for tests, here and in embedding
//! applications.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::config::IdentityStoreConfig;
use crate::notify::BroadcastNotifier;
use crate::prelude::*;

pub const TEST_ADMIN_PASSWORD: &str = "test admin password";

/// Resource properties kept in a map.
#[derive(Debug, Default)]
pub struct MemoryProperties {
    props: Mutex<BTreeMap<(ResourceId, String), JsonValue>>,
    invalidated: Mutex<Vec<ResourceId>>,
}

#[allow(clippy::expect_used)]
impl MemoryProperties {
    pub fn set(&self, rsc_id: ResourceId, name: &str, value: JsonValue) {
        self.props
            .lock()
            .expect("poisoned")
            .insert((rsc_id, name.to_string()), value);
    }

    pub fn get(&self, rsc_id: ResourceId, name: &str) -> Option<JsonValue> {
        self.props
            .lock()
            .expect("poisoned")
            .get(&(rsc_id, name.to_string()))
            .cloned()
    }

    pub fn invalidated(&self) -> Vec<ResourceId> {
        self.invalidated.lock().expect("poisoned").clone()
    }
}

impl ResourceProperties for MemoryProperties {
    fn get_property(&self, rsc_id: ResourceId, name: &str) -> Option<JsonValue> {
        self.get(rsc_id, name)
    }

    fn update_properties(
        &self,
        rsc_id: ResourceId,
        props: BTreeMap<String, JsonValue>,
    ) -> Result<(), OperationError> {
        let mut guard = self
            .props
            .lock()
            .map_err(|_| OperationError::PropertyStore("poisoned".to_string()))?;
        for (name, value) in props {
            guard.insert((rsc_id, name), value);
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn invalidate(&self, rsc_id: ResourceId) {
        self.invalidated.lock().expect("poisoned").push(rsc_id);
    }
}

/// Users may edit their own resource. Everything else has to be granted.
#[derive(Debug, Default)]
pub struct TestAccessControls {
    modules: Mutex<BTreeSet<(ResourceId, String)>>,
    edits: Mutex<BTreeSet<(ResourceId, ResourceId)>>,
}

#[allow(clippy::expect_used)]
impl TestAccessControls {
    pub fn grant_module(&self, user: ResourceId, module: &str) {
        self.modules
            .lock()
            .expect("poisoned")
            .insert((user, module.to_string()));
    }

    pub fn grant_edit(&self, user: ResourceId, rsc_id: ResourceId) {
        self.edits.lock().expect("poisoned").insert((user, rsc_id));
    }
}

#[allow(clippy::expect_used)]
impl AccessControls for TestAccessControls {
    fn is_allowed(&self, caller: &Caller, action: AclAction, object: AclObject<'_>) -> bool {
        let Some(user) = caller.get_rsc_id() else {
            return caller.is_internal();
        };
        match (action, object) {
            (AclAction::Use, AclObject::Module(module)) => self
                .modules
                .lock()
                .expect("poisoned")
                .contains(&(user, module.to_string())),
            (_, AclObject::Resource(rsc_id)) => {
                user == rsc_id || self.edits.lock().expect("poisoned").contains(&(user, rsc_id))
            }
            _ => false,
        }
    }
}

pub struct TestStore {
    pub store: IdentityStore,
    pub properties: Arc<MemoryProperties>,
    pub acp: Arc<TestAccessControls>,
    pub events: broadcast::Receiver<(String, IdentityEvent)>,
}

impl TestStore {
    /// Events published since the last drain, in order.
    pub fn drain_events(&mut self) -> Vec<IdentityEvent> {
        let mut events = Vec::new();
        while let Ok((topic, event)) = self.events.try_recv() {
            debug_assert_eq!(topic, event.topic());
            events.push(event);
        }
        events
    }
}

/// An in-memory store with the admin password set to [`TEST_ADMIN_PASSWORD`].
pub fn setup_test() -> TestStore {
    setup_test_with_config(IdentityStoreConfig {
        admin_password: Some(TEST_ADMIN_PASSWORD.to_string()),
        ..IdentityStoreConfig::new_for_test()
    })
}

/// Like [`setup_test`], but backed by a sqlite file at `path` with `pool_size` connections.
pub fn setup_test_on_disk(path: &Path, pool_size: u32) -> TestStore {
    setup_test_with_config(IdentityStoreConfig {
        db_path: path.to_string_lossy().into_owned(),
        db_pool_size: Some(pool_size),
        admin_password: Some(TEST_ADMIN_PASSWORD.to_string()),
        ..IdentityStoreConfig::new_for_test()
    })
}

#[allow(clippy::expect_used)]
pub fn setup_test_with_config(config: IdentityStoreConfig) -> TestStore {
    sketching::test_init();

    let properties = Arc::new(MemoryProperties::default());
    let acp = Arc::new(TestAccessControls::default());
    let notifier = Arc::new(BroadcastNotifier::default());
    let events = notifier.subscribe();

    let store = IdentityStore::new(&config, acp.clone(), properties.clone(), notifier)
        .expect("Failed to setup identity store");

    TestStore {
        store,
        properties,
        acp,
        events,
    }
}
