//! Built-in in-process connector.
//!
//! Objects live in a [`MemoryDirectory`] shared between connector instances.
//! Every change bumps a sequence number; full imports persist the sequence
//! as connector data and delta imports return what changed after it.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use idsync_core::ConnectedSystemId;
use idsync_db::models::{
    AttributeChangeType, AttributeDataType, ConnectedSystem, CsoValue, ImportValue,
    PendingExport, PendingExportChangeType, SettingValue,
};

use crate::capabilities::{ConnectorCapabilities, ConnectorCapability};
use crate::error::{ConnectorError, ConnectorResult};
use crate::export::ExportObjectResult;
use crate::import::{
    ImportChangeType, ImportMode, ImportObject, ImportObjectAttribute, ImportPage, ImportRequest,
};
use crate::registry::{ConnectorInstance, ConnectorRegistry};
use crate::schema::{
    ConnectorPartition, ConnectorSchema, ConnectorSettingDefinition, SchemaObjectType, SettingType,
};
use crate::traits::{
    Connector, ConnectorSettings, ExportCapable, ImportCapable, PartitionDiscovery,
    SchemaDiscovery,
};

/// Registry key of the memory connector.
pub const MEMORY_CONNECTOR_TYPE: &str = "memory";

const SETTING_FAIL_OPEN: &str = "fail_open";
const SETTING_SUPPORTS_DELTA: &str = "supports_delta";
const SETTING_PARALLEL_EXPORT: &str = "parallel_export";
const CONTAINER_ATTRIBUTE: &str = "container";

/// One object held by a [`MemoryDirectory`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryObject {
    pub object_type: String,
    pub attributes: BTreeMap<String, Vec<ImportValue>>,
}

impl MemoryObject {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: ImportValue) -> Self {
        self.attributes.entry(name.into()).or_default().push(value);
        self
    }

    #[must_use]
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<ImportValue>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    #[must_use]
    pub fn values(&self, name: &str) -> &[ImportValue] {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map_or(&[], |(_, v)| v.as_slice())
    }
}

#[derive(Debug, Clone)]
struct ChangeRecord {
    sequence: u64,
    key: (String, String),
    created: bool,
}

#[derive(Debug, Default)]
struct DirectoryState {
    /// Keyed by (lower-case object type, external id).
    objects: BTreeMap<(String, String), MemoryObject>,
    changes: Vec<ChangeRecord>,
    sequence: u64,
    created_containers: BTreeSet<String>,
    known_containers: HashSet<String>,
    failing_external_ids: HashSet<String>,
}

impl DirectoryState {
    fn record(&mut self, key: (String, String), created: bool) {
        self.sequence += 1;
        self.changes.push(ChangeRecord {
            sequence: self.sequence,
            key,
            created,
        });
    }
}

/// Object store behind the memory connector.
#[derive(Debug)]
pub struct MemoryDirectory {
    schema: ConnectorSchema,
    partitions: Vec<ConnectorPartition>,
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new(schema: ConnectorSchema) -> Self {
        Self {
            schema,
            partitions: Vec::new(),
            state: RwLock::new(DirectoryState::default()),
        }
    }

    #[must_use]
    pub fn with_partition(mut self, partition: ConnectorPartition) -> Self {
        self.partitions.push(partition);
        self
    }

    pub fn schema(&self) -> &ConnectorSchema {
        &self.schema
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_type(&self, name: &str) -> ConnectorResult<&SchemaObjectType> {
        self.schema
            .object_type(name)
            .ok_or_else(|| ConnectorError::ObjectTypeNotFound {
                object_type: name.to_string(),
            })
    }

    fn external_id_attribute(&self, object_type: &str) -> ConnectorResult<String> {
        self.object_type(object_type)?
            .recommended_external_id
            .clone()
            .ok_or_else(|| {
                ConnectorError::invalid_configuration(format!(
                    "object type '{object_type}' has no external id attribute"
                ))
            })
    }

    fn external_id_of(&self, object: &MemoryObject) -> ConnectorResult<String> {
        let attribute = self.external_id_attribute(&object.object_type)?;
        object
            .values(&attribute)
            .first()
            .and_then(|v| v.external_id_key())
            .ok_or_else(|| ConnectorError::InvalidData {
                message: format!("object has no value for external id attribute '{attribute}'"),
            })
    }

    /// Insert or replace an object. Returns its external id.
    pub fn put(&self, object: MemoryObject) -> ConnectorResult<String> {
        let external_id = self.external_id_of(&object)?;
        let key = (object.object_type.to_lowercase(), external_id.clone());
        let mut state = self.write();
        let created = state.objects.insert(key.clone(), object).is_none();
        state.record(key, created);
        Ok(external_id)
    }

    /// Delete an object. Returns whether it existed.
    pub fn remove(&self, object_type: &str, external_id: &str) -> bool {
        let key = (object_type.to_lowercase(), external_id.to_string());
        let mut state = self.write();
        let existed = state.objects.remove(&key).is_some();
        if existed {
            state.record(key, false);
        }
        existed
    }

    #[must_use]
    pub fn get(&self, object_type: &str, external_id: &str) -> Option<MemoryObject> {
        self.read()
            .objects
            .get(&(object_type.to_lowercase(), external_id.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make exports of this external id fail.
    pub fn fail_exports_for(&self, external_id: impl Into<String>) {
        self.write().failing_external_ids.insert(external_id.into());
    }

    /// Containers created by exports so far.
    #[must_use]
    pub fn created_containers(&self) -> Vec<String> {
        self.read().created_containers.iter().cloned().collect()
    }

    fn current_sequence(&self) -> u64 {
        self.read().sequence
    }

    /// The object as import data. Every requested attribute is carried,
    /// attributes the object lacks as an explicit null.
    fn to_import_object(
        &self,
        object: &MemoryObject,
        selected: &[String],
        change_type: ImportChangeType,
    ) -> ImportObject {
        let external_id_attribute = self
            .external_id_attribute(&object.object_type)
            .unwrap_or_default();
        let mut requested: Vec<String> = if selected.is_empty() {
            self.object_type(&object.object_type)
                .map(|t| t.attributes.iter().map(|a| a.name.clone()).collect())
                .unwrap_or_default()
        } else {
            selected.to_vec()
        };
        if !requested
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&external_id_attribute))
        {
            requested.push(external_id_attribute);
        }

        let mut import = ImportObject::new(object.object_type.clone()).with_change_type(change_type);
        for name in requested {
            let values = object.values(&name);
            import.attributes.push(if values.is_empty() {
                ImportObjectAttribute::null(name)
            } else {
                ImportObjectAttribute::new(name, values.iter().cloned().map(Some).collect())
            });
        }
        import
    }

    fn deleted_import_object(&self, object_type: &str, external_id: &str) -> ImportObject {
        let attribute = self.external_id_attribute(object_type).unwrap_or_default();
        ImportObject::new(object_type.to_string())
            .with_change_type(ImportChangeType::Delete)
            .with_attribute(ImportObjectAttribute::single(
                attribute,
                ImportValue::Text(external_id.to_string()),
            ))
    }

    /// Everything the request covers, in a stable order. A partition scope
    /// keeps objects whose container lies in that partition; deletes are
    /// always returned since their container is gone.
    fn collect_import(
        &self,
        request: &ImportRequest,
        watermark: u64,
    ) -> ConnectorResult<Vec<ImportObject>> {
        let selection: HashMap<String, &[String]> = request
            .object_types
            .iter()
            .map(|t| (t.name.to_lowercase(), t.attributes.as_slice()))
            .collect();
        let partition = match request.partition.as_deref() {
            Some(id) => Some(
                self.partitions
                    .iter()
                    .find(|p| p.external_id.eq_ignore_ascii_case(id))
                    .ok_or_else(|| {
                        ConnectorError::invalid_configuration(format!("unknown partition '{id}'"))
                    })?,
            ),
            None => None,
        };
        let in_scope = |object: &MemoryObject| {
            partition.map_or(true, |p| in_partition(object, &p.external_id))
        };
        let state = self.read();

        match request.mode {
            ImportMode::Full => Ok(state
                .objects
                .iter()
                .filter(|(_, object)| in_scope(object))
                .filter_map(|((object_type, _), object)| {
                    selection.get(object_type).map(|attributes| {
                        self.to_import_object(object, attributes, ImportChangeType::NotSet)
                    })
                })
                .collect()),
            ImportMode::Delta => {
                // Latest change per key after the watermark.
                let mut changed: BTreeMap<(String, String), bool> = BTreeMap::new();
                for record in state.changes.iter().filter(|c| c.sequence > watermark) {
                    let created = changed.get(&record.key).copied().unwrap_or(false);
                    changed.insert(record.key.clone(), created || record.created);
                }
                let mut objects = Vec::new();
                for ((object_type, external_id), created) in changed {
                    let Some(attributes) = selection.get(&object_type) else {
                        continue;
                    };
                    match state.objects.get(&(object_type.clone(), external_id.clone())) {
                        Some(object) if !in_scope(object) => {}
                        Some(object) => {
                            let change_type = if created {
                                ImportChangeType::Create
                            } else {
                                ImportChangeType::Update
                            };
                            objects.push(self.to_import_object(object, attributes, change_type));
                        }
                        None => {
                            let name = self
                                .object_type(&object_type)
                                .map(|t| t.name.clone())
                                .unwrap_or(object_type);
                            objects.push(self.deleted_import_object(&name, &external_id));
                        }
                    }
                }
                Ok(objects)
            }
        }
    }

    fn export_one(&self, export: &PendingExport) -> ExportObjectResult {
        match export.change_type {
            PendingExportChangeType::Create => self.export_create(export),
            PendingExportChangeType::Update => self.export_update(export),
        }
        .unwrap_or_else(|e| ExportObjectResult::failed(export.id, e.to_string()))
    }

    fn export_create(&self, export: &PendingExport) -> ConnectorResult<ExportObjectResult> {
        let object_type = self.object_type(&export.object_type_name)?;
        let external_id_attribute = self.external_id_attribute(&export.object_type_name)?;

        let mut object = MemoryObject::new(object_type.name.clone());
        for change in &export.attribute_changes {
            if change.change_type == AttributeChangeType::Add {
                object = object.with(change.attribute_name.clone(), to_connector_value(&change.value));
            }
        }

        let external_id = match object
            .values(&external_id_attribute)
            .first()
            .and_then(|v| v.external_id_key())
            .or_else(|| export.external_id.clone())
        {
            Some(id) => id,
            None => {
                let generated = Uuid::new_v4();
                let value = match object_type
                    .attribute(&external_id_attribute)
                    .map(|a| a.data_type)
                {
                    Some(AttributeDataType::Guid) => ImportValue::Guid(generated),
                    _ => ImportValue::Text(generated.to_string()),
                };
                object = object.with_values(external_id_attribute.clone(), vec![value]);
                generated.to_string()
            }
        };
        if object.values(&external_id_attribute).is_empty() {
            object = object.with_values(
                external_id_attribute.clone(),
                vec![ImportValue::Text(external_id.clone())],
            );
        }

        let key = (object.object_type.to_lowercase(), external_id.clone());
        let mut state = self.write();
        if state.failing_external_ids.contains(&external_id) {
            return Err(ConnectorError::operation_failed(format!(
                "export rejected for '{external_id}'"
            )));
        }
        if state.objects.contains_key(&key) {
            return Err(ConnectorError::ObjectAlreadyExists {
                identifier: external_id,
            });
        }
        if let Some(ImportValue::Text(container)) = object.values(CONTAINER_ATTRIBUTE).first() {
            let container = container.clone();
            if state.known_containers.insert(container.clone()) {
                state.created_containers.insert(container);
            }
        }
        state.objects.insert(key.clone(), object);
        state.record(key, true);
        Ok(ExportObjectResult::created(export.id, external_id))
    }

    fn export_update(&self, export: &PendingExport) -> ConnectorResult<ExportObjectResult> {
        let object_type = self.object_type(&export.object_type_name)?;
        let external_id = export
            .external_id
            .clone()
            .ok_or_else(|| ConnectorError::InvalidData {
                message: "update without external id".to_string(),
            })?;
        let key = (object_type.name.to_lowercase(), external_id.clone());

        let mut state = self.write();
        if state.failing_external_ids.contains(&external_id) {
            return Err(ConnectorError::operation_failed(format!(
                "export rejected for '{external_id}'"
            )));
        }
        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                identifier: external_id.clone(),
            })?;
        for change in &export.attribute_changes {
            let value = to_connector_value(&change.value);
            let values = object
                .attributes
                .entry(change.attribute_name.clone())
                .or_default();
            match change.change_type {
                AttributeChangeType::Add => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                AttributeChangeType::Remove => values.retain(|v| v != &value),
            }
        }
        object.attributes.retain(|_, v| !v.is_empty());
        state.record(key, false);
        Ok(ExportObjectResult::success(export.id))
    }
}

/// Whether the object's container is the partition or nested below it.
fn in_partition(object: &MemoryObject, partition: &str) -> bool {
    let Some(ImportValue::Text(container)) = object.values(CONTAINER_ATTRIBUTE).first() else {
        return false;
    };
    let container = container.to_lowercase();
    let partition = partition.to_lowercase();
    container == partition || container.ends_with(&format!(",{partition}"))
}

fn to_connector_value(value: &CsoValue) -> ImportValue {
    match value.clone().try_map_reference(|r| Some(r.unresolved_reference_value)) {
        Some(v) => v,
        None => ImportValue::Text(String::new()),
    }
}

fn bool_setting(settings: &HashMap<String, SettingValue>, name: &str, default: bool) -> bool {
    settings
        .get(name)
        .and_then(SettingValue::as_bool)
        .unwrap_or(default)
}

/// Connector over a [`MemoryDirectory`].
pub struct MemoryConnector {
    directory: Arc<MemoryDirectory>,
    capabilities: ConnectorCapabilities,
    import_open: AtomicBool,
    export_open: AtomicBool,
}

impl MemoryConnector {
    pub fn new(directory: Arc<MemoryDirectory>, settings: &ConnectorSettings) -> Self {
        let mut capabilities = ConnectorCapabilities::new()
            .with(ConnectorCapability::SupportsFullImport)
            .with(ConnectorCapability::SupportsExport)
            .with(ConnectorCapability::SupportsUserSelectedExternalId);
        if bool_setting(settings, SETTING_SUPPORTS_DELTA, true) {
            capabilities = capabilities.with(ConnectorCapability::SupportsDeltaImport);
        }
        if bool_setting(settings, SETTING_PARALLEL_EXPORT, true) {
            capabilities = capabilities.with(ConnectorCapability::SupportsParallelExport);
        }
        if !directory.partitions.is_empty() {
            capabilities = capabilities.with(ConnectorCapability::SupportsPartitions);
        }
        Self {
            directory,
            capabilities,
            import_open: AtomicBool::new(false),
            export_open: AtomicBool::new(false),
        }
    }

    fn open(settings: &ConnectorSettings) -> ConnectorResult<()> {
        if bool_setting(settings, SETTING_FAIL_OPEN, false) {
            return Err(ConnectorError::connection_failed(
                "memory directory refused the connection",
            ));
        }
        Ok(())
    }
}

impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        MEMORY_CONNECTOR_TYPE
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        self.capabilities.clone()
    }

    fn settings_schema(&self) -> Vec<ConnectorSettingDefinition> {
        vec![
            ConnectorSettingDefinition::new(SETTING_SUPPORTS_DELTA, SettingType::Boolean)
                .with_default(SettingValue::Boolean(true))
                .with_description("Offer delta imports"),
            ConnectorSettingDefinition::new(SETTING_PARALLEL_EXPORT, SettingType::Boolean)
                .with_default(SettingValue::Boolean(true)),
            ConnectorSettingDefinition::new(SETTING_FAIL_OPEN, SettingType::Boolean)
                .with_default(SettingValue::Boolean(false))
                .with_description("Refuse connections (testing)"),
        ]
    }
}

#[async_trait]
impl SchemaDiscovery for MemoryConnector {
    async fn get_schema(&self, _settings: &ConnectorSettings) -> ConnectorResult<ConnectorSchema> {
        Ok(self.directory.schema.clone())
    }
}

#[async_trait]
impl PartitionDiscovery for MemoryConnector {
    async fn get_partitions(
        &self,
        _settings: &ConnectorSettings,
    ) -> ConnectorResult<Vec<ConnectorPartition>> {
        Ok(self.directory.partitions.clone())
    }
}

#[async_trait]
impl ImportCapable for MemoryConnector {
    async fn open_import_connection(&self, settings: &ConnectorSettings) -> ConnectorResult<()> {
        Self::open(settings)?;
        self.import_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn import(
        &self,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> ConnectorResult<ImportPage> {
        if !self.import_open.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotConnected {
                operation: "import".to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }

        // Tokens: [offset, watermark-at-run-start].
        let (offset, snapshot) = match request.pagination_tokens.as_slice() {
            [] => (0usize, self.directory.current_sequence()),
            [offset, snapshot] => {
                let parse_err = || ConnectorError::InvalidPaginationToken {
                    token: request.pagination_tokens.join(","),
                };
                (
                    offset.parse().map_err(|_| parse_err())?,
                    snapshot.parse().map_err(|_| parse_err())?,
                )
            }
            _ => {
                return Err(ConnectorError::InvalidPaginationToken {
                    token: request.pagination_tokens.join(","),
                })
            }
        };

        let watermark = match request.mode {
            ImportMode::Full => 0,
            ImportMode::Delta => request
                .persisted_connector_data
                .as_deref()
                .and_then(|d| d.parse::<u64>().ok())
                .ok_or_else(|| ConnectorError::InvalidData {
                    message: "delta import needs the watermark of a previous full import"
                        .to_string(),
                })?,
        };

        let all = self.directory.collect_import(request, watermark)?;
        let page_size = request.page_size.max(1) as usize;
        let end = (offset + page_size).min(all.len());
        let objects = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let more_to_import = end < all.len();

        debug!(
            mode = %request.mode,
            offset,
            returned = objects.len(),
            more_to_import,
            "Memory connector import page"
        );

        Ok(ImportPage {
            objects,
            more_to_import,
            pagination_tokens: if more_to_import {
                vec![end.to_string(), snapshot.to_string()]
            } else {
                Vec::new()
            },
            persisted_connector_data: Some(snapshot.to_string()),
        })
    }

    async fn close_import_connection(&self) -> ConnectorResult<()> {
        self.import_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExportCapable for MemoryConnector {
    async fn open_export_connection(&self, settings: &ConnectorSettings) -> ConnectorResult<()> {
        Self::open(settings)?;
        self.export_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn export(
        &self,
        exports: &[PendingExport],
        cancel: &CancellationToken,
    ) -> ConnectorResult<Vec<ExportObjectResult>> {
        if !self.export_open.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotConnected {
                operation: "export".to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        Ok(exports
            .iter()
            .map(|export| self.directory.export_one(export))
            .collect())
    }

    async fn close_export_connection(&self) -> ConnectorResult<()> {
        self.export_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn created_container_dns(&self) -> Vec<String> {
        self.directory.created_containers()
    }
}

/// Hands out memory connectors bound to the directory of each system.
#[derive(Clone, Default)]
pub struct MemoryConnectorFactory {
    directories: Arc<Mutex<HashMap<ConnectedSystemId, Arc<MemoryDirectory>>>>,
}

impl MemoryConnectorFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a directory to a connected system.
    pub fn attach(&self, system: ConnectedSystemId, directory: Arc<MemoryDirectory>) {
        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(system, directory);
    }

    #[must_use]
    pub fn directory(&self, system: ConnectedSystemId) -> Option<Arc<MemoryDirectory>> {
        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&system)
            .cloned()
    }

    pub fn create(&self, system: &ConnectedSystem) -> ConnectorResult<ConnectorInstance> {
        let directory = self.directory(system.id).ok_or_else(|| {
            ConnectorError::invalid_configuration(format!(
                "no memory directory attached to connected system '{}'",
                system.name
            ))
        })?;
        let connector = Arc::new(MemoryConnector::new(directory, &system.setting_values));
        Ok(ConnectorInstance::new(connector.clone())
            .with_schema_discovery(connector.clone())
            .with_partition_discovery(connector.clone())
            .with_import(connector.clone())
            .with_export(connector))
    }

    /// Register under [`MEMORY_CONNECTOR_TYPE`].
    pub fn register(&self, registry: &mut ConnectorRegistry) {
        let factory = self.clone();
        registry.register(MEMORY_CONNECTOR_TYPE, move |system| factory.create(system));
        info!(connector_type = MEMORY_CONNECTOR_TYPE, "Registered connector");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ImportObjectTypeSelection;
    use crate::schema::SchemaAttribute;

    fn directory() -> Arc<MemoryDirectory> {
        let schema = ConnectorSchema::new().with_object_type(
            SchemaObjectType::new("person")
                .with_attribute(SchemaAttribute::new("employeeId", AttributeDataType::Text))
                .with_attribute(SchemaAttribute::new("mail", AttributeDataType::Text))
                .with_external_id("employeeId"),
        );
        Arc::new(MemoryDirectory::new(schema))
    }

    fn person(id: &str, mail: &str) -> MemoryObject {
        MemoryObject::new("person")
            .with("employeeId", ImportValue::Text(id.into()))
            .with("mail", ImportValue::Text(mail.into()))
    }

    fn request(mode: ImportMode, data: Option<String>) -> ImportRequest {
        ImportRequest {
            mode,
            object_types: vec![ImportObjectTypeSelection {
                name: "person".into(),
                attributes: vec![],
            }],
            partition: None,
            page_size: 2,
            pagination_tokens: vec![],
            persisted_connector_data: data,
        }
    }

    #[tokio::test]
    async fn test_full_import_pages() {
        let dir = directory();
        for i in 0..3 {
            dir.put(person(&format!("E{i}"), "x@example.com")).unwrap();
        }
        let connector = MemoryConnector::new(dir, &ConnectorSettings::new());
        let cancel = CancellationToken::new();
        connector
            .open_import_connection(&ConnectorSettings::new())
            .await
            .unwrap();

        let mut req = request(ImportMode::Full, None);
        let first = connector.import(&req, &cancel).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.more_to_import);

        req.pagination_tokens = first.pagination_tokens.clone();
        let second = connector.import(&req, &cancel).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert!(!second.more_to_import);
        assert_eq!(second.persisted_connector_data.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_delta_import_reports_changes_since_watermark() {
        let dir = directory();
        dir.put(person("E1", "a@example.com")).unwrap();
        dir.put(person("E2", "b@example.com")).unwrap();
        let connector = MemoryConnector::new(dir.clone(), &ConnectorSettings::new());
        let cancel = CancellationToken::new();
        connector
            .open_import_connection(&ConnectorSettings::new())
            .await
            .unwrap();

        let full = connector
            .import(&request(ImportMode::Full, None), &cancel)
            .await
            .unwrap();
        let watermark = full.persisted_connector_data.clone();

        dir.put(person("E1", "new@example.com")).unwrap();
        assert!(dir.remove("person", "E2"));
        dir.put(person("E3", "c@example.com")).unwrap();

        let delta = connector
            .import(&request(ImportMode::Delta, watermark), &cancel)
            .await
            .unwrap();
        let mut changes: Vec<_> = delta
            .objects
            .iter()
            .map(|o| (o.attribute("employeeId").unwrap().values[0].clone(), o.change_type))
            .collect();
        changes.sort_by_key(|(v, _)| format!("{v:?}"));
        assert_eq!(
            changes,
            vec![
                (Some(ImportValue::Text("E1".into())), ImportChangeType::Update),
                (Some(ImportValue::Text("E2".into())), ImportChangeType::Delete),
                (Some(ImportValue::Text("E3".into())), ImportChangeType::Create),
            ]
        );
    }

    #[tokio::test]
    async fn test_partition_scoped_import() {
        let schema = directory().schema().clone();
        let dir = Arc::new(MemoryDirectory::new(schema).with_partition(ConnectorPartition {
            external_id: "dc=corp".into(),
            name: "corp".into(),
            containers: vec![],
        }));
        dir.put(person("E1", "a@example.com").with(
            CONTAINER_ATTRIBUTE,
            ImportValue::Text("ou=Users,DC=corp".into()),
        ))
        .unwrap();
        dir.put(person("E2", "b@example.com").with(
            CONTAINER_ATTRIBUTE,
            ImportValue::Text("ou=Users,dc=lab".into()),
        ))
        .unwrap();
        dir.put(person("E3", "c@example.com")).unwrap();

        let connector = MemoryConnector::new(dir, &ConnectorSettings::new());
        let cancel = CancellationToken::new();
        connector
            .open_import_connection(&ConnectorSettings::new())
            .await
            .unwrap();

        let mut req = request(ImportMode::Full, None);
        req.page_size = 10;
        req.partition = Some("dc=corp".into());
        let page = connector.import(&req, &cancel).await.unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(
            page.objects[0].attribute("employeeId").unwrap().values[0],
            Some(ImportValue::Text("E1".into()))
        );

        req.partition = Some("dc=unknown".into());
        let err = connector.import(&req, &cancel).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[tokio::test]
    async fn test_import_requires_open_connection() {
        let connector = MemoryConnector::new(directory(), &ConnectorSettings::new());
        let err = connector
            .import(&request(ImportMode::Full, None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_fail_open_setting() {
        let mut settings = ConnectorSettings::new();
        settings.insert(SETTING_FAIL_OPEN.into(), SettingValue::Boolean(true));
        let connector = MemoryConnector::new(directory(), &settings);
        assert!(connector.open_import_connection(&settings).await.is_err());
    }

    #[test]
    fn test_capabilities_follow_settings() {
        let mut settings = ConnectorSettings::new();
        settings.insert(SETTING_SUPPORTS_DELTA.into(), SettingValue::Boolean(false));
        let connector = MemoryConnector::new(directory(), &settings);
        assert!(!connector.supports(ConnectorCapability::SupportsDeltaImport));
        assert!(connector.supports(ConnectorCapability::SupportsParallelExport));
    }
}
