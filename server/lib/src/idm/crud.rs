//! Creating and removing identities of any type.

use crate::be::dbidentity::DbIdentityNew;
use crate::be::BackendTransaction;
use crate::prelude::*;
use crate::properties::{get_property_text, set_property};

impl IdentityStore {
    /// Add an identity to a resource. Adding a (resource, type, key) that already exists
    /// returns the existing identity, marking it verified when `props` asks for that.
    #[instrument(level = "debug", skip_all)]
    pub fn insert(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
        props: IdentityProps,
    ) -> Result<IdentityId, OperationError> {
        self.guard_admin_identity(rsc_id, idn_type)?;
        let key = self.key_rules.prepare(idn_type, key)?;
        let IdentityProps {
            is_unique,
            is_verified,
            verify_key,
            propb,
        } = props;

        let (id, changed) = self
            .be
            .transaction(|txn| {
                if let Some(existing) = txn.get_rsc_identity_by_type_key(rsc_id, idn_type, &key)? {
                    if is_verified && !existing.is_verified {
                        txn.set_verified_id(existing.id)?;
                        return Ok((existing.id, true));
                    }
                    return Ok((existing.id, false));
                }

                if is_unique && txn.exists_type_key(idn_type, &key, Some(rsc_id))? {
                    return Err(OperationError::DuplicateKey);
                }
                // One login per resource.
                if idn_type == IDENTITY_TYPE_USERNAME_PW
                    && txn.exists_rsc_type(rsc_id, IDENTITY_TYPE_USERNAME_PW)?
                {
                    return Err(OperationError::DuplicateKey);
                }

                let id = txn.insert_identity(&DbIdentityNew {
                    rsc_id,
                    idn_type,
                    key: &key,
                    is_unique,
                    is_verified,
                    verify_key: verify_key.as_deref(),
                    propb: propb.as_ref(),
                })?;
                Ok((id, true))
            })
            .map_err(|err| {
                admin_error!(site = %self.site, %rsc_id, %idn_type, ?err, "Could not insert identity");
                err
            })?;

        if changed {
            request_info!(%rsc_id, %idn_type, %id, "identity stored");
            self.publish(rsc_id, idn_type);
        }
        Ok(id)
    }

    /// Add an identity whose key no other resource may hold.
    pub fn insert_unique(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
        props: IdentityProps,
    ) -> Result<IdentityId, OperationError> {
        self.insert(
            rsc_id,
            idn_type,
            key,
            IdentityProps {
                is_unique: true,
                ..props
            },
        )
    }

    /// Set the key (and propb) of every identity of the type on the resource, creating one
    /// when there is none. The key is normalized but not validated, so types like an external
    /// account id can carry any shape of key. Usernames still may not be reserved or taken.
    #[instrument(level = "debug", skip_all)]
    pub fn set_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
        props: IdentityProps,
    ) -> Result<(), OperationError> {
        self.guard_admin_identity(rsc_id, idn_type)?;
        let key = self.key_rules.normalize(idn_type, key);
        if key.is_empty()
            || (idn_type == IDENTITY_TYPE_USERNAME_PW && self.key_rules.is_reserved_name(&key))
        {
            return Err(OperationError::InvalidKey);
        }
        let IdentityProps {
            is_unique,
            is_verified,
            verify_key,
            propb,
        } = props;

        self.be
            .transaction(|txn| {
                if (is_unique || idn_type == IDENTITY_TYPE_USERNAME_PW)
                    && txn.exists_type_key(idn_type, &key, Some(rsc_id))?
                {
                    return Err(OperationError::DuplicateKey);
                }
                if txn.update_by_type(rsc_id, idn_type, &key, propb.as_ref())? > 0 {
                    return Ok(());
                }
                txn.insert_identity(&DbIdentityNew {
                    rsc_id,
                    idn_type,
                    key: &key,
                    is_unique,
                    is_verified,
                    verify_key: verify_key.as_deref(),
                    propb: propb.as_ref(),
                })
                .map(|_| ())
            })
            .map_err(|err| {
                admin_error!(site = %self.site, %rsc_id, %idn_type, ?err, "Could not set identity");
                err
            })?;

        self.publish(rsc_id, idn_type);
        Ok(())
    }

    /// Delete one identity. The caller must be able to edit the resource it belongs to.
    /// Deleting the email the resource uses as its primary address moves the primary address
    /// to the best remaining email identity.
    #[instrument(level = "debug", skip_all)]
    pub fn delete(&self, caller: &Caller, id: IdentityId) -> Result<(), OperationError> {
        let idn = self
            .be
            .read()?
            .get_identity(id)?
            .ok_or(OperationError::NotFound)?;
        self.guard_admin_identity(idn.rsc_id, &idn.idn_type)?;
        self.check_edit_access(caller, idn.rsc_id)?;

        if self.be.transaction(|txn| txn.delete_identity(id))? == 0 {
            // Raced with another delete.
            return Err(OperationError::NotFound);
        }
        request_info!(rsc_id = %idn.rsc_id, idn_type = %idn.idn_type, %id, "identity deleted");

        if idn.is_type(IDENTITY_TYPE_EMAIL) {
            self.reconcile_primary_email(idn.rsc_id, &idn.key)?;
        }
        self.publish(idn.rsc_id, &idn.idn_type);
        Ok(())
    }

    /// Delete every identity of the type on the resource. Returns how many were removed.
    pub fn delete_by_type(&self, rsc_id: ResourceId, idn_type: &str) -> Result<usize, OperationError> {
        self.guard_admin_identity(rsc_id, idn_type)?;
        let removed = self
            .be
            .transaction(|txn| txn.delete_rsc_type(rsc_id, idn_type))?;
        if removed > 0 {
            self.publish(rsc_id, idn_type);
        }
        Ok(removed)
    }

    pub fn delete_by_type_and_key(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<usize, OperationError> {
        self.guard_admin_identity(rsc_id, idn_type)?;
        let key = self.key_rules.normalize(idn_type, key);
        let removed = self
            .be
            .transaction(|txn| txn.delete_rsc_type_key(rsc_id, idn_type, &key))?;
        if removed > 0 {
            if idn_type == IDENTITY_TYPE_EMAIL {
                self.reconcile_primary_email(rsc_id, &key)?;
            }
            self.publish(rsc_id, idn_type);
        }
        Ok(removed)
    }

    /// Move the identities of `loser` to `winner`, for when two resources turn out to be the
    /// same person. Keys the winner already has are dropped, as are the loser's credentials
    /// when the winner has its own.
    #[instrument(level = "debug", skip_all)]
    pub fn merge(
        &self,
        caller: &Caller,
        winner: ResourceId,
        loser: ResourceId,
    ) -> Result<(), OperationError> {
        if winner == loser {
            return Err(OperationError::BadArgument);
        }
        // Merging into the admin would hand it the loser's login.
        self.guard_admin(winner)?;
        self.guard_admin(loser)?;
        self.check_edit_access(caller, winner)?;
        self.check_edit_access(caller, loser)?;

        let changed = self.be.transaction(|txn| txn.merge_rsc(winner, loser))?;
        security_info!(%winner, %loser, %changed, "merged identities");
        if changed > 0 {
            self.publish(winner, IDENTITY_TYPE_USERNAME_PW);
            self.publish(loser, IDENTITY_TYPE_USERNAME_PW);
            self.properties.invalidate(winner);
            self.properties.invalidate(loser);
        }
        Ok(())
    }

    /// After `deleted_key` was removed from the resource's emails, point the primary email at
    /// the preferred remaining email identity, or clear it.
    pub(crate) fn reconcile_primary_email(
        &self,
        rsc_id: ResourceId,
        deleted_key: &str,
    ) -> Result<(), OperationError> {
        let Some(primary) = get_property_text(&*self.properties, rsc_id, PROPERTY_EMAIL) else {
            return Ok(());
        };
        if self.key_rules.normalize(IDENTITY_TYPE_EMAIL, &primary) != deleted_key {
            return Ok(());
        }

        let next = self
            .be
            .read()?
            .get_rsc_identity_by_type(rsc_id, IDENTITY_TYPE_EMAIL)?;
        let value = match next {
            Some(idn) => {
                request_info!(%rsc_id, "primary email moved to remaining email identity");
                JsonValue::String(idn.key)
            }
            None => {
                request_info!(%rsc_id, "primary email cleared");
                JsonValue::Null
            }
        };
        set_property(&*self.properties, rsc_id, PROPERTY_EMAIL, value)
    }
}
