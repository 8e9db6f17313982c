//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Space records, keyed by `space_id`.
    pub const SPACES: &str = "spaces";

    /// Index: space id by path, keyed by the path bytes.
    pub const SPACES_BY_PATH: &str = "spaces_by_path";

    /// Gitspace config records, keyed by `config_id`.
    pub const GITSPACE_CONFIGS: &str = "gitspace_configs";

    /// Index: config id by `space_id || identifier`.
    pub const GITSPACE_CONFIGS_BY_IDENTIFIER: &str = "gitspace_configs_by_identifier";

    /// Gitspace instance records, keyed by `instance_id`.
    pub const GITSPACE_INSTANCES: &str = "gitspace_instances";

    /// Index: instances by config, keyed by `config_id || instance_id`.
    pub const GITSPACE_INSTANCES_BY_CONFIG: &str = "gitspace_instances_by_config";

    /// Provider config records, keyed by `infra_provider_config_id`.
    pub const INFRA_PROVIDER_CONFIGS: &str = "infra_provider_configs";

    /// Provider resource records, keyed by `infra_provider_resource_id`.
    pub const INFRA_PROVIDER_RESOURCES: &str = "infra_provider_resources";

    /// Provider template records, keyed by `infra_provider_template_id`.
    pub const INFRA_PROVIDER_TEMPLATES: &str = "infra_provider_templates";

    /// Index: template id by `space_id || identifier`.
    pub const INFRA_PROVIDER_TEMPLATES_BY_IDENTIFIER: &str =
        "infra_provider_templates_by_identifier";

    /// Provisioned-infrastructure records, keyed by `infra_provisioned_id`.
    pub const INFRA_PROVISIONED: &str = "infra_provisioned";

    /// Index: provisioned records by instance, keyed by `instance_id || infra_provisioned_id`.
    pub const INFRA_PROVISIONED_BY_INSTANCE: &str = "infra_provisioned_by_instance";

    /// Domain event records, keyed by `event_id`.
    pub const GITSPACE_EVENTS: &str = "gitspace_events";

    /// Index: events by entity, keyed by `entity_type || entity_id || event_id`.
    pub const GITSPACE_EVENTS_BY_ENTITY: &str = "gitspace_events_by_entity";

    /// Id sequences, keyed by the name of the column family they allocate for.
    pub const SEQUENCES: &str = "sequences";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SPACES,
        cf::SPACES_BY_PATH,
        cf::GITSPACE_CONFIGS,
        cf::GITSPACE_CONFIGS_BY_IDENTIFIER,
        cf::GITSPACE_INSTANCES,
        cf::GITSPACE_INSTANCES_BY_CONFIG,
        cf::INFRA_PROVIDER_CONFIGS,
        cf::INFRA_PROVIDER_RESOURCES,
        cf::INFRA_PROVIDER_TEMPLATES,
        cf::INFRA_PROVIDER_TEMPLATES_BY_IDENTIFIER,
        cf::INFRA_PROVISIONED,
        cf::INFRA_PROVISIONED_BY_INSTANCE,
        cf::GITSPACE_EVENTS,
        cf::GITSPACE_EVENTS_BY_ENTITY,
        cf::SEQUENCES,
    ]
}
