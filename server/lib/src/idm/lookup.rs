use crate::be::BackendTransaction;
use crate::prelude::*;
use crate::properties::get_property_text;

impl IdentityStore {
    pub fn get(&self, id: IdentityId) -> Result<Option<IdentityRecord>, OperationError> {
        self.be.read()?.get_identity(id)
    }

    /// All identities of a resource, by type then key.
    pub fn get_rsc(&self, rsc_id: ResourceId) -> Result<Vec<IdentityRecord>, OperationError> {
        self.be.read()?.get_rsc_identities(rsc_id)
    }

    /// All identities of one type on a resource, verified first.
    ///
    /// For emails this also repairs a resource whose primary email property has no matching
    /// identity, which happens when the property was written without going through the store.
    #[instrument(level = "debug", skip_all)]
    pub fn get_rsc_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
    ) -> Result<Vec<IdentityRecord>, OperationError> {
        let idns = self.be.read()?.get_rsc_identities_by_type(rsc_id, idn_type)?;
        if idn_type != IDENTITY_TYPE_EMAIL {
            return Ok(idns);
        }

        let Some(email) = get_property_text(&*self.properties, rsc_id, PROPERTY_EMAIL) else {
            return Ok(idns);
        };
        let email = self.key_rules.normalize(IDENTITY_TYPE_EMAIL, &email);
        if !self.key_rules.is_valid(IDENTITY_TYPE_EMAIL, &email) || idns.iter().any(|i| i.key == email)
        {
            return Ok(idns);
        }

        request_info!(%rsc_id, "adding email identity missing for the primary email");
        self.insert(rsc_id, IDENTITY_TYPE_EMAIL, &email, IdentityProps::default())?;
        self.be.read()?.get_rsc_identities_by_type(rsc_id, idn_type)
    }

    /// The preferred identity of a type on a resource: verified first, then the most
    /// recently changed.
    pub fn get_rsc_identity(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        self.be.read()?.get_rsc_identity_by_type(rsc_id, idn_type)
    }

    pub fn get_rsc_types(&self, rsc_id: ResourceId) -> Result<Vec<String>, OperationError> {
        self.be.read()?.get_rsc_types(rsc_id)
    }

    pub fn lookup_by_type_and_key(
        &self,
        idn_type: &str,
        key: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        let key = self.key_rules.normalize(idn_type, key);
        self.be.read()?.get_by_type_key(idn_type, &key)
    }

    /// Every identity holding the key, across resources.
    pub fn lookup_by_type_and_key_multi(
        &self,
        idn_type: &str,
        key: &str,
    ) -> Result<Vec<IdentityRecord>, OperationError> {
        let key = self.key_rules.normalize(idn_type, key);
        self.be.read()?.get_all_by_type_key(idn_type, &key)
    }

    pub fn lookup_by_verify_key(
        &self,
        verify_key: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        if verify_key.is_empty() {
            return Ok(None);
        }
        self.be.read()?.get_by_verify_key(verify_key)
    }
}
