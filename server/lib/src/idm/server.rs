use std::sync::Arc;

use crate::be::dbidentity::DbIdentityNew;
use crate::be::{Backend, BackendTransaction};
use crate::config::IdentityStoreConfig;
use crate::idm::keyrules::KeyRules;
use crate::plugins::PasswordMatchers;
use crate::prelude::*;

/// The identity store. Cheap to share behind an `Arc`; every operation takes `&self` and runs
/// in its own backend transaction.
pub struct IdentityStore {
    pub(crate) be: Backend,
    pub(crate) site: String,
    pub(crate) admin_password: Option<String>,
    pub(crate) key_rules: KeyRules,
    pub(crate) matchers: PasswordMatchers,
    pub(crate) acp: Arc<dyn AccessControls>,
    pub(crate) properties: Arc<dyn ResourceProperties>,
    pub(crate) notifier: Arc<dyn IdentityNotifier>,
}

/// The admin's login row. It never carries a password, it only records admin visits.
fn seed_admin_identity(be: &Backend) -> Result<(), OperationError> {
    be.transaction(|txn| {
        if txn.exists_rsc_type(RESOURCE_ID_ADMIN, IDENTITY_TYPE_USERNAME_PW)? {
            return Ok(());
        }
        let id = txn.insert_identity(&DbIdentityNew {
            rsc_id: RESOURCE_ID_ADMIN,
            idn_type: IDENTITY_TYPE_USERNAME_PW,
            key: ADMIN_USERNAME,
            is_unique: true,
            is_verified: true,
            verify_key: None,
            propb: None,
        })?;
        admin_info!(%id, "seeded admin identity");
        Ok(())
    })
}

impl IdentityStore {
    #[instrument(level = "debug", name = "identity_store::new", skip_all)]
    pub fn new(
        config: &IdentityStoreConfig,
        acp: Arc<dyn AccessControls>,
        properties: Arc<dyn ResourceProperties>,
        notifier: Arc<dyn IdentityNotifier>,
    ) -> Result<Self, OperationError> {
        let be = Backend::new(config.backend_config()).map_err(|err| {
            admin_error!(?err, site = %config.site, "Unable to open identity backend");
            err
        })?;

        if config.admin_password.as_deref().map_or(true, str::is_empty) {
            admin_warn!(site = %config.site, "No admin password configured, admin login is disabled");
        }
        seed_admin_identity(&be)?;

        Ok(IdentityStore {
            be,
            site: config.site.clone(),
            admin_password: config.admin_password.clone(),
            key_rules: KeyRules::new(&config.denied_names),
            matchers: PasswordMatchers::default(),
            acp,
            properties,
            notifier,
        })
    }

    /// Consult `matcher` for stored passwords, ahead of the built-in hash tuples.
    pub fn with_password_matcher(mut self, matcher: Arc<dyn PasswordMatcher>) -> Self {
        self.matchers.register(matcher);
        self
    }

    /// Normalize and validate keys of `idn_type` with `rule`.
    pub fn with_key_rule(mut self, idn_type: &str, rule: Arc<dyn KeyRule>) -> Self {
        self.key_rules.register(idn_type, rule);
        self
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn key_rules(&self) -> &KeyRules {
        &self.key_rules
    }

    pub fn is_valid_key(&self, idn_type: &str, key: &str) -> bool {
        self.key_rules.is_valid(idn_type, key)
    }

    pub fn normalize_key(&self, idn_type: &str, key: &str) -> String {
        self.key_rules.normalize(idn_type, key)
    }

    pub fn is_reserved_name(&self, name: &str) -> bool {
        self.key_rules.is_reserved_name(name)
    }

    // The admin's credentials are owned by configuration.
    pub(crate) fn guard_admin(&self, rsc_id: ResourceId) -> Result<(), OperationError> {
        if rsc_id == RESOURCE_ID_ADMIN {
            security_error!(%rsc_id, "refusing to change credentials of the admin");
            Err(OperationError::SystemProtectedObject)
        } else {
            Ok(())
        }
    }

    /// Logins of the admin can't be created, moved or removed through generic identity
    /// operations either.
    pub(crate) fn guard_admin_identity(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
    ) -> Result<(), OperationError> {
        if idn_type == IDENTITY_TYPE_USERNAME_PW {
            self.guard_admin(rsc_id)
        } else {
            Ok(())
        }
    }

    /// May the caller manage the credentials of `rsc_id`? Yes for the system, for the user
    /// themselves and for holders of the identity admin module.
    pub(crate) fn check_credentials_access(
        &self,
        caller: &Caller,
        rsc_id: ResourceId,
    ) -> Result<(), OperationError> {
        if caller.is_internal()
            || caller.is_rsc(rsc_id)
            || self.acp.is_allowed(
                caller,
                AclAction::Use,
                AclObject::Module(MOD_ADMIN_IDENTITY),
            )
        {
            Ok(())
        } else {
            security_access!(%caller, %rsc_id, "denied credential change");
            Err(OperationError::AccessDenied)
        }
    }

    pub(crate) fn check_edit_access(
        &self,
        caller: &Caller,
        rsc_id: ResourceId,
    ) -> Result<(), OperationError> {
        if caller.is_internal() || self.acp.can_edit(caller, rsc_id) {
            Ok(())
        } else {
            security_access!(%caller, %rsc_id, "denied identity change");
            Err(OperationError::AccessDenied)
        }
    }

    pub(crate) fn publish(&self, rsc_id: ResourceId, idn_type: &str) {
        let event = IdentityEvent::new(rsc_id, idn_type);
        self.notifier.publish(&event.topic(), &event);
    }
}
