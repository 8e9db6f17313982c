//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use gitspace_core::{
    GitspaceConfigId, GitspaceEventId, GitspaceInstanceId, InfraProviderConfigId,
    InfraProviderResourceId, InfraProviderTemplateId, InfraProvisionedId, SpaceId,
};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys::{self, ID_LEN};
use crate::schema::{all_column_families, cf};
use crate::types::{
    GitspaceConfig, GitspaceEntityType, GitspaceEventRecord, GitspaceInstance,
    InfraProviderConfig, InfraProviderResource, InfraProviderTemplate, InfraProvisioned, Space,
};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes id allocation and unique-index checks.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Read and decode a primary record.
    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        id: [u8; ID_LEN],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, keys::id_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    /// Resolve an id stored as the value of a unique index.
    fn lookup_index(&self, cf_name: &str, key: &[u8]) -> Result<Option<[u8; ID_LEN]>> {
        let cf = self.cf(cf_name)?;
        let value = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        match value {
            Some(bytes) => keys::decode_id(&bytes)
                .map(Some)
                .ok_or_else(|| StoreError::Serialization(format!("corrupt index in {cf_name}"))),
            None => Ok(None),
        }
    }

    /// Collect the child ids stored under a parent prefix, in key order.
    fn scan_children(&self, index_cf: &str, prefix: &[u8]) -> Result<Vec<[u8; ID_LEN]>> {
        let cf = self.cf(index_cf)?;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            if let Some(id) = keys::extract_child_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Allocate the next id of a sequence, staging the counter write in `batch`.
    ///
    /// Callers must hold `write_lock` until the batch is written.
    fn next_id(&self, sequence: &str, batch: &mut WriteBatch) -> Result<i64> {
        let cf = self.cf(cf::SEQUENCES)?;
        let current = self
            .db
            .get_cf(&cf, sequence.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|bytes| {
                keys::decode_id(&bytes)
                    .map(i64::from_be_bytes)
                    .ok_or_else(|| StoreError::Serialization(format!("corrupt sequence {sequence}")))
            })
            .transpose()?
            .unwrap_or(0);

        let next = current + 1;
        batch.put_cf(&cf, sequence.as_bytes(), next.to_be_bytes());
        Ok(next)
    }

    fn put_record<T: serde::Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        id: [u8; ID_LEN],
        record: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(&cf, keys::id_key(id), Self::serialize(record)?);
        Ok(())
    }

    fn update_existing<T: serde::Serialize>(
        &self,
        cf_name: &str,
        id: [u8; ID_LEN],
        record: &T,
    ) -> Result<()> {
        if !self.exists(cf_name, &keys::id_key(id))? {
            return Err(StoreError::NotFound);
        }
        let mut batch = WriteBatch::default();
        self.put_record(&mut batch, cf_name, id, record)?;
        self.write(batch)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Space Operations
    // =========================================================================

    fn create_space(&self, space: &mut Space) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_path = self.cf(cf::SPACES_BY_PATH)?;
        let path_key = keys::space_path_key(&space.path);

        if self.exists(cf::SPACES_BY_PATH, &path_key)? {
            return Err(StoreError::AlreadyExists(format!("space {}", space.path)));
        }

        let mut batch = WriteBatch::default();
        space.id = SpaceId::new(self.next_id(cf::SPACES, &mut batch)?);
        self.put_record(&mut batch, cf::SPACES, space.id.to_be_bytes(), space)?;
        batch.put_cf(&cf_by_path, &path_key, space.id.to_be_bytes());
        self.write(batch)
    }

    fn get_space(&self, space_id: SpaceId) -> Result<Option<Space>> {
        self.get_record(cf::SPACES, space_id.to_be_bytes())
    }

    fn find_space_by_path(&self, path: &str) -> Result<Option<Space>> {
        match self.lookup_index(cf::SPACES_BY_PATH, &keys::space_path_key(path))? {
            Some(id) => self.get_record(cf::SPACES, id),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Gitspace Config Operations
    // =========================================================================

    fn create_gitspace_config(&self, config: &mut GitspaceConfig) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_identifier = self.cf(cf::GITSPACE_CONFIGS_BY_IDENTIFIER)?;
        let identifier_key = keys::scoped_identifier_key(config.space_id, &config.identifier);

        if self.exists(cf::GITSPACE_CONFIGS_BY_IDENTIFIER, &identifier_key)? {
            return Err(StoreError::AlreadyExists(format!(
                "gitspace config {}",
                config.identifier
            )));
        }

        let mut batch = WriteBatch::default();
        config.id = GitspaceConfigId::new(self.next_id(cf::GITSPACE_CONFIGS, &mut batch)?);
        self.put_record(&mut batch, cf::GITSPACE_CONFIGS, config.id.to_be_bytes(), config)?;
        batch.put_cf(&cf_by_identifier, &identifier_key, config.id.to_be_bytes());
        self.write(batch)
    }

    fn update_gitspace_config(&self, config: &GitspaceConfig) -> Result<()> {
        self.update_existing(cf::GITSPACE_CONFIGS, config.id.to_be_bytes(), config)
    }

    fn get_gitspace_config(&self, config_id: GitspaceConfigId) -> Result<Option<GitspaceConfig>> {
        self.get_record(cf::GITSPACE_CONFIGS, config_id.to_be_bytes())
    }

    fn find_gitspace_config_by_identifier(
        &self,
        space_id: SpaceId,
        identifier: &str,
    ) -> Result<Option<GitspaceConfig>> {
        let key = keys::scoped_identifier_key(space_id, identifier);
        match self.lookup_index(cf::GITSPACE_CONFIGS_BY_IDENTIFIER, &key)? {
            Some(id) => self.get_record(cf::GITSPACE_CONFIGS, id),
            None => Ok(None),
        }
    }

    fn list_all_gitspace_configs(&self) -> Result<Vec<GitspaceConfig>> {
        let cf = self.cf(cf::GITSPACE_CONFIGS)?;

        let mut configs = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            configs.push(Self::deserialize(&value)?);
        }

        Ok(configs)
    }

    // =========================================================================
    // Gitspace Instance Operations
    // =========================================================================

    fn create_gitspace_instance(&self, instance: &mut GitspaceInstance) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_config = self.cf(cf::GITSPACE_INSTANCES_BY_CONFIG)?;

        let mut batch = WriteBatch::default();
        instance.id = GitspaceInstanceId::new(self.next_id(cf::GITSPACE_INSTANCES, &mut batch)?);
        self.put_record(
            &mut batch,
            cf::GITSPACE_INSTANCES,
            instance.id.to_be_bytes(),
            instance,
        )?;
        batch.put_cf(
            &cf_by_config,
            keys::child_key(
                instance.gitspace_config_id.to_be_bytes(),
                instance.id.to_be_bytes(),
            ),
            [],
        );
        self.write(batch)
    }

    fn update_gitspace_instance(&self, instance: &GitspaceInstance) -> Result<()> {
        self.update_existing(cf::GITSPACE_INSTANCES, instance.id.to_be_bytes(), instance)
    }

    fn get_gitspace_instance(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Option<GitspaceInstance>> {
        self.get_record(cf::GITSPACE_INSTANCES, instance_id.to_be_bytes())
    }

    fn find_latest_gitspace_instance(
        &self,
        config_id: GitspaceConfigId,
    ) -> Result<Option<GitspaceInstance>> {
        let prefix = keys::parent_prefix(config_id.to_be_bytes());
        match self
            .scan_children(cf::GITSPACE_INSTANCES_BY_CONFIG, &prefix)?
            .last()
        {
            Some(id) => self.get_record(cf::GITSPACE_INSTANCES, *id),
            None => Ok(None),
        }
    }

    fn list_gitspace_instances_by_config(
        &self,
        config_id: GitspaceConfigId,
    ) -> Result<Vec<GitspaceInstance>> {
        let prefix = keys::parent_prefix(config_id.to_be_bytes());
        let mut instances = Vec::new();
        for id in self.scan_children(cf::GITSPACE_INSTANCES_BY_CONFIG, &prefix)? {
            if let Some(instance) = self.get_record(cf::GITSPACE_INSTANCES, id)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    // =========================================================================
    // Infra Provider Operations
    // =========================================================================

    fn create_infra_provider_config(&self, config: &mut InfraProviderConfig) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        config.id = InfraProviderConfigId::new(self.next_id(cf::INFRA_PROVIDER_CONFIGS, &mut batch)?);
        self.put_record(
            &mut batch,
            cf::INFRA_PROVIDER_CONFIGS,
            config.id.to_be_bytes(),
            config,
        )?;
        self.write(batch)
    }

    fn get_infra_provider_config(
        &self,
        config_id: InfraProviderConfigId,
    ) -> Result<Option<InfraProviderConfig>> {
        self.get_record(cf::INFRA_PROVIDER_CONFIGS, config_id.to_be_bytes())
    }

    fn create_infra_provider_resource(&self, resource: &mut InfraProviderResource) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        resource.id =
            InfraProviderResourceId::new(self.next_id(cf::INFRA_PROVIDER_RESOURCES, &mut batch)?);
        self.put_record(
            &mut batch,
            cf::INFRA_PROVIDER_RESOURCES,
            resource.id.to_be_bytes(),
            resource,
        )?;
        self.write(batch)
    }

    fn get_infra_provider_resource(
        &self,
        resource_id: InfraProviderResourceId,
    ) -> Result<Option<InfraProviderResource>> {
        self.get_record(cf::INFRA_PROVIDER_RESOURCES, resource_id.to_be_bytes())
    }

    fn create_infra_provider_template(&self, template: &mut InfraProviderTemplate) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_identifier = self.cf(cf::INFRA_PROVIDER_TEMPLATES_BY_IDENTIFIER)?;
        let identifier_key = keys::scoped_identifier_key(template.space_id, &template.identifier);

        if self.exists(cf::INFRA_PROVIDER_TEMPLATES_BY_IDENTIFIER, &identifier_key)? {
            return Err(StoreError::AlreadyExists(format!(
                "infra provider template {}",
                template.identifier
            )));
        }

        let mut batch = WriteBatch::default();
        template.id =
            InfraProviderTemplateId::new(self.next_id(cf::INFRA_PROVIDER_TEMPLATES, &mut batch)?);
        self.put_record(
            &mut batch,
            cf::INFRA_PROVIDER_TEMPLATES,
            template.id.to_be_bytes(),
            template,
        )?;
        batch.put_cf(&cf_by_identifier, &identifier_key, template.id.to_be_bytes());
        self.write(batch)
    }

    fn find_infra_provider_template(
        &self,
        space_id: SpaceId,
        identifier: &str,
    ) -> Result<Option<InfraProviderTemplate>> {
        let key = keys::scoped_identifier_key(space_id, identifier);
        match self.lookup_index(cf::INFRA_PROVIDER_TEMPLATES_BY_IDENTIFIER, &key)? {
            Some(id) => self.get_record(cf::INFRA_PROVIDER_TEMPLATES, id),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Infra Provisioned Operations
    // =========================================================================

    fn create_infra_provisioned(&self, record: &mut InfraProvisioned) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_instance = self.cf(cf::INFRA_PROVISIONED_BY_INSTANCE)?;

        let mut batch = WriteBatch::default();
        record.id = InfraProvisionedId::new(self.next_id(cf::INFRA_PROVISIONED, &mut batch)?);
        self.put_record(&mut batch, cf::INFRA_PROVISIONED, record.id.to_be_bytes(), record)?;
        batch.put_cf(
            &cf_by_instance,
            keys::child_key(
                record.gitspace_instance_id.to_be_bytes(),
                record.id.to_be_bytes(),
            ),
            [],
        );
        self.write(batch)
    }

    fn update_infra_provisioned(&self, record: &InfraProvisioned) -> Result<()> {
        self.update_existing(cf::INFRA_PROVISIONED, record.id.to_be_bytes(), record)
    }

    fn get_infra_provisioned(
        &self,
        record_id: InfraProvisionedId,
    ) -> Result<Option<InfraProvisioned>> {
        self.get_record(cf::INFRA_PROVISIONED, record_id.to_be_bytes())
    }

    fn find_latest_infra_provisioned(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Option<InfraProvisioned>> {
        let prefix = keys::parent_prefix(instance_id.to_be_bytes());
        match self
            .scan_children(cf::INFRA_PROVISIONED_BY_INSTANCE, &prefix)?
            .last()
        {
            Some(id) => self.get_record(cf::INFRA_PROVISIONED, *id),
            None => Ok(None),
        }
    }

    fn list_infra_provisioned_by_instance(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Vec<InfraProvisioned>> {
        let prefix = keys::parent_prefix(instance_id.to_be_bytes());
        let mut records = Vec::new();
        for id in self.scan_children(cf::INFRA_PROVISIONED_BY_INSTANCE, &prefix)? {
            if let Some(record) = self.get_record(cf::INFRA_PROVISIONED, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn delete_infra_provisioned(&self, record_id: InfraProvisionedId) -> Result<()> {
        let cf_provisioned = self.cf(cf::INFRA_PROVISIONED)?;
        let cf_by_instance = self.cf(cf::INFRA_PROVISIONED_BY_INSTANCE)?;

        // Get the record to find its instance
        let record = self
            .get_infra_provisioned(record_id)?
            .ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_provisioned, keys::id_key(record_id.to_be_bytes()));
        batch.delete_cf(
            &cf_by_instance,
            keys::child_key(
                record.gitspace_instance_id.to_be_bytes(),
                record_id.to_be_bytes(),
            ),
        );
        self.write(batch)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    fn create_gitspace_event(&self, event: &mut GitspaceEventRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_by_entity = self.cf(cf::GITSPACE_EVENTS_BY_ENTITY)?;

        let mut batch = WriteBatch::default();
        event.id = GitspaceEventId::new(self.next_id(cf::GITSPACE_EVENTS, &mut batch)?);
        self.put_record(&mut batch, cf::GITSPACE_EVENTS, event.id.to_be_bytes(), event)?;
        batch.put_cf(
            &cf_by_entity,
            keys::entity_event_key(event.entity_type, event.entity_id, event.id.to_be_bytes()),
            [],
        );
        self.write(batch)
    }

    fn list_gitspace_events(
        &self,
        entity_type: GitspaceEntityType,
        entity_id: i64,
    ) -> Result<Vec<GitspaceEventRecord>> {
        let cf_by_entity = self.cf(cf::GITSPACE_EVENTS_BY_ENTITY)?;
        let prefix = keys::entity_prefix(entity_type, entity_id);

        let mut events = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_entity,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            if let Some(id) = keys::extract_event_id(&key) {
                if let Some(event) = self.get_record(cf::GITSPACE_EVENTS, id)? {
                    events.push(event);
                }
            }
        }

        Ok(events)
    }
}
