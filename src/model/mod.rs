//! Topology model: typed handles over the store's rows, plus the dotted/slashed
//! name resolver used by the HTTP surface and the interactive shell.
//!
//! The original (`original_source/src/model.py`) builds this with a single
//! `Queryable` base class that resolves arbitrary attributes through Python's
//! `__getattr__`/`__setattr__` against a per-class attribute table, caching
//! `can_be_cached` attributes (`name`, `group`, `node`, a device's `metrics`
//! list) on first read while always refetching the mutable ones (`status`,
//! timestamps, a metric's `value`). Rust has no equivalent dynamic dispatch,
//! so this is a tagged-variant facade instead: one struct per entity kind
//! (`Group`, `Node`, `Device`, `Metric`), each a thin handle carrying its id,
//! a handle to the store, and a `OnceCell` for whatever of its attributes is
//! immutable for the entity's lifetime. The cache is per entity *value*: a
//! clone gets its own empty cell rather than sharing one, matching the
//! original's policy of caching being a property of one `Queryable` instance.

use std::cell::OnceCell;
use std::sync::Arc;

use crate::codec::MetricDatatype;
use crate::error::{HostError, Result};
use crate::store::{self, MetricSample, Store};

#[derive(Clone)]
pub struct Model {
    store: Arc<Store>,
}

impl Model {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn group(&self, id: i64) -> Result<Group> {
        self.store.group(id)?;
        Ok(Group::new(self.store.clone(), id))
    }

    pub fn node(&self, id: i64) -> Result<Node> {
        self.store.node(id)?;
        Ok(Node::new(self.store.clone(), id))
    }

    pub fn device(&self, id: i64) -> Result<Device> {
        self.store.device(id)?;
        Ok(Device::new(self.store.clone(), id))
    }

    pub fn metric(&self, id: i64) -> Result<Metric> {
        self.store.metric(id)?;
        Ok(Metric::new(self.store.clone(), id))
    }

    pub fn groups(&self) -> Result<Vec<Group>> {
        self.store
            .all_group_ids()?
            .into_iter()
            .map(|id| self.group(id))
            .collect()
    }

    pub fn nodes(&self) -> Result<Vec<Node>> {
        self.store
            .all_node_ids()?
            .into_iter()
            .map(|id| self.node(id))
            .collect()
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        self.store
            .all_device_ids()?
            .into_iter()
            .map(|id| self.device(id))
            .collect()
    }

    /// Groups matching a name pattern. Errors if none match.
    pub fn get_group(&self, name: &str) -> Result<Vec<Group>> {
        let ids = self.store.group_id_by_name(name)?;
        if ids.is_empty() {
            return Err(HostError::NotFound(format!("no such group: {name}")));
        }
        ids.into_iter().map(|id| self.group(id)).collect()
    }

    /// Nodes matching a name pattern, optionally scoped to a group pattern.
    pub fn get_node(&self, group_name: Option<&str>, node_name: &str) -> Result<Vec<Node>> {
        let ids = self.store.node_id_by_name(group_name, node_name)?;
        if ids.is_empty() {
            return Err(HostError::NotFound(format!("no such node: {node_name}")));
        }
        ids.into_iter().map(|id| self.node(id)).collect()
    }

    /// Devices matching a name pattern, optionally scoped to group/node patterns.
    pub fn get_device(
        &self,
        group_name: Option<&str>,
        node_name: Option<&str>,
        device_name: &str,
    ) -> Result<Vec<Device>> {
        let ids = self.store.device_id_by_name(group_name, node_name, device_name)?;
        if ids.is_empty() {
            let mut full_name = String::new();
            if let Some(g) = group_name {
                full_name.push_str(g);
                full_name.push('/');
            }
            if let Some(n) = node_name {
                full_name.push_str(n);
                full_name.push('/');
            }
            full_name.push_str(device_name);
            return Err(HostError::NotFound(format!("no such device: {full_name}")));
        }
        ids.into_iter().map(|id| self.device(id)).collect()
    }

    /// Resolves a dotted/slashed entity reference the way the shell's `get`
    /// command does: three slash-separated parts name a device, two try a
    /// device-under-a-node first and fall back to a node-under-a-group, and a
    /// bare name is tried as a device, then a node, then a group, with every
    /// match aggregated.
    pub fn resolve(&self, name: &str) -> Result<Entity> {
        let mut matches: Vec<Entity> = Vec::new();

        if let Some((head, tail)) = name.split_once('/') {
            let parts: Vec<&str> = name.split('/').collect();
            if parts.len() == 3 {
                let devices = self.get_device(Some(parts[0]), Some(parts[1]), parts[2])?;
                matches.extend(devices.into_iter().map(Entity::Device));
            } else if parts.len() == 2 {
                if let Ok(devices) = self.get_device(None, Some(head), tail) {
                    matches.extend(devices.into_iter().map(Entity::Device));
                }
                if let Ok(nodes) = self.get_node(Some(head), tail) {
                    matches.extend(nodes.into_iter().map(Entity::Node));
                }
            }
        } else {
            if let Ok(devices) = self.get_device(None, None, name) {
                matches.extend(devices.into_iter().map(Entity::Device));
            }
            if let Ok(nodes) = self.get_node(None, name) {
                matches.extend(nodes.into_iter().map(Entity::Node));
            }
            if let Ok(groups) = self.get_group(name) {
                matches.extend(groups.into_iter().map(Entity::Group));
            }
        }

        match matches.len() {
            0 => Err(HostError::NotFound(format!("no such name: {name}"))),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Ok(Entity::Many(matches)),
        }
    }

    pub fn create_group(&self, name: &str) -> Result<Group> {
        let id = self.store.insert_group(name)?;
        self.group(id)
    }

    pub fn create_node(&self, group_name: &str, node_name: &str) -> Result<Node> {
        let id = self.store.insert_node(group_name, node_name, "NA", Some(0), Some(0))?;
        self.node(id)
    }

    pub fn create_device(&self, group_name: &str, node_name: &str, device_name: &str) -> Result<Device> {
        let id = self.store.insert_device(group_name, node_name, device_name, "NA", Some(0), Some(0))?;
        self.device(id)
    }

    pub fn create_metric(
        &self,
        group_name: &str,
        node_name: &str,
        device_name: &str,
        metric_name: &str,
        datatype: MetricDatatype,
    ) -> Result<Metric> {
        let id = self.store.insert_metric(
            group_name,
            node_name,
            device_name,
            metric_name,
            store::metric_type_name(datatype),
        )?;
        self.metric(id)
    }
}

/// Any entity `resolve` can return, including the aggregate case where more
/// than one thing in the topology matches a given name.
pub enum Entity {
    Group(Group),
    Node(Node),
    Device(Device),
    Many(Vec<Entity>),
}

#[derive(Clone)]
pub struct Group {
    store: Arc<Store>,
    id: i64,
    name_cache: OnceCell<String>,
}

impl Group {
    fn new(store: Arc<Store>, id: i64) -> Self {
        Self { store, id, name_cache: OnceCell::new() }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Immutable for the group's lifetime, so cached after the first read.
    pub fn name(&self) -> Result<String> {
        if let Some(name) = self.name_cache.get() {
            return Ok(name.clone());
        }
        let name = self.store.group(self.id)?.group_name;
        let _ = self.name_cache.set(name.clone());
        Ok(name)
    }

    pub fn nodes(&self) -> Result<Vec<Node>> {
        self.store
            .nodes_in_group(self.id)?
            .into_iter()
            .map(|id| Ok(Node::new(self.store.clone(), id)))
            .collect()
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        self.store
            .devices_in_group(self.id)?
            .into_iter()
            .map(|id| Ok(Device::new(self.store.clone(), id)))
            .collect()
    }

    /// Looks up a node of this group by its exact name (the shell's
    /// `group.node.<name>` form).
    pub fn node_named(&self, name: &str) -> Result<Node> {
        self.nodes()?
            .into_iter()
            .find(|n| n.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| HostError::NotFound(format!("group {} has no node {name}", self.id)))
    }
}

/// The part of a node's row that never changes once the node exists.
#[derive(Clone)]
struct NodeIdentity {
    name: String,
    group_id: i64,
}

#[derive(Clone)]
pub struct Node {
    store: Arc<Store>,
    id: i64,
    identity_cache: OnceCell<NodeIdentity>,
}

impl Node {
    fn new(store: Arc<Store>, id: i64) -> Self {
        Self { store, id, identity_cache: OnceCell::new() }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    fn row(&self) -> Result<store::NodeRow> {
        self.store.node(self.id)
    }

    /// `name` and `group_id` are immutable for the node's lifetime; cached
    /// together after the first read so `name()` and `group()` only cost one
    /// round trip between them.
    fn identity(&self) -> Result<NodeIdentity> {
        if let Some(identity) = self.identity_cache.get() {
            return Ok(identity.clone());
        }
        let row = self.row()?;
        let identity = NodeIdentity { name: row.edge_node_name, group_id: row.group_id };
        let _ = self.identity_cache.set(identity.clone());
        Ok(identity)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.identity()?.name)
    }

    pub fn group(&self) -> Result<Group> {
        let group_id = self.identity()?.group_id;
        Ok(Group::new(self.store.clone(), group_id))
    }

    pub fn status(&self) -> Result<String> {
        Ok(self.row()?.status)
    }

    pub fn birth_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.row()?.birth_timestamp)
    }

    pub fn death_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.row()?.death_timestamp)
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        self.store
            .devices_on_node(self.id)?
            .into_iter()
            .map(|id| Ok(Device::new(self.store.clone(), id)))
            .collect()
    }

    pub fn device_named(&self, name: &str) -> Result<Device> {
        self.devices()?
            .into_iter()
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| HostError::NotFound(format!("node {} has no device {name}", self.id)))
    }

    pub fn set_status(&self, status: &str) -> Result<()> {
        self.store.set_node_status(self.id, status)
    }

    pub fn set_death_timestamp(&self, ts: i64) -> Result<()> {
        self.store.set_node_death_timestamp(self.id, ts)
    }
}

/// The part of a device's row that never changes once the device exists.
#[derive(Clone)]
struct DeviceIdentity {
    name: String,
    edge_node_id: i64,
}

#[derive(Clone)]
pub struct Device {
    store: Arc<Store>,
    id: i64,
    identity_cache: OnceCell<DeviceIdentity>,
    /// A device's metric list is fixed once birthed; cached the way the
    /// original caches a device's `metrics` attribute.
    metrics_cache: OnceCell<Vec<i64>>,
}

impl Device {
    fn new(store: Arc<Store>, id: i64) -> Self {
        Self {
            store,
            id,
            identity_cache: OnceCell::new(),
            metrics_cache: OnceCell::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    fn row(&self) -> Result<store::DeviceRow> {
        self.store.device(self.id)
    }

    fn identity(&self) -> Result<DeviceIdentity> {
        if let Some(identity) = self.identity_cache.get() {
            return Ok(identity.clone());
        }
        let row = self.row()?;
        let identity = DeviceIdentity { name: row.device_name, edge_node_id: row.edge_node_id };
        let _ = self.identity_cache.set(identity.clone());
        Ok(identity)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.identity()?.name)
    }

    pub fn node(&self) -> Result<Node> {
        let edge_node_id = self.identity()?.edge_node_id;
        Ok(Node::new(self.store.clone(), edge_node_id))
    }

    pub fn group(&self) -> Result<Group> {
        self.node()?.group()
    }

    pub fn status(&self) -> Result<String> {
        Ok(self.row()?.status)
    }

    pub fn birth_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.row()?.birth_timestamp)
    }

    pub fn death_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.row()?.death_timestamp)
    }

    pub fn metrics(&self) -> Result<Vec<Metric>> {
        if let Some(ids) = self.metrics_cache.get() {
            return ids.iter().map(|&id| Ok(Metric::new(self.store.clone(), id))).collect();
        }
        let ids = self.store.metrics_on_device(self.id)?;
        let _ = self.metrics_cache.set(ids.clone());
        ids.into_iter().map(|id| Ok(Metric::new(self.store.clone(), id))).collect()
    }

    pub fn metric_named(&self, name: &str) -> Result<Metric> {
        self.metrics()?
            .into_iter()
            .find(|m| m.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| HostError::NotFound(format!("device {} has no metric {name}", self.id)))
    }

    pub fn set_status(&self, status: &str) -> Result<()> {
        self.store.set_device_status(self.id, status)
    }

    pub fn set_death_timestamp(&self, ts: i64) -> Result<()> {
        self.store.set_device_death_timestamp(self.id, ts)
    }
}

/// The part of a metric's row that never changes once the metric is created.
#[derive(Clone)]
struct MetricIdentity {
    name: String,
    metric_type: String,
}

#[derive(Clone)]
pub struct Metric {
    store: Arc<Store>,
    id: i64,
    identity_cache: OnceCell<MetricIdentity>,
}

impl Metric {
    fn new(store: Arc<Store>, id: i64) -> Self {
        Self { store, id, identity_cache: OnceCell::new() }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    fn row(&self) -> Result<store::MetricRow> {
        self.store.metric(self.id)
    }

    fn identity(&self) -> Result<MetricIdentity> {
        if let Some(identity) = self.identity_cache.get() {
            return Ok(identity.clone());
        }
        let row = self.row()?;
        let identity = MetricIdentity { name: row.metric_name, metric_type: row.metric_type };
        let _ = self.identity_cache.set(identity.clone());
        Ok(identity)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.identity()?.name)
    }

    pub fn metric_type(&self) -> Result<String> {
        Ok(self.identity()?.metric_type)
    }

    pub fn value(&self) -> Result<Option<MetricSample>> {
        self.store.metric_value(self.id)
    }

    pub fn values(&self) -> Result<Vec<MetricSample>> {
        self.store.metric_values(self.id)
    }

    pub fn timestamp(&self) -> Result<Option<i64>> {
        Ok(self.value()?.map(|s| s.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MetricValue;

    fn model_with_fixture() -> (Model, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("m.db")).unwrap());
        let model = Model::new(store);
        model.create_group("plant1").unwrap();
        model.create_node("plant1", "edge1").unwrap();
        model.create_device("plant1", "edge1", "pump1").unwrap();
        model
            .create_metric("plant1", "edge1", "pump1", "temperature", MetricDatatype::Double)
            .unwrap();
        (model, dir)
    }

    #[test]
    fn three_part_path_resolves_to_a_device() {
        let (model, _dir) = model_with_fixture();
        match model.resolve("plant1/edge1/pump1").unwrap() {
            Entity::Device(d) => assert_eq!(d.name().unwrap(), "pump1"),
            _ => panic!("expected a device"),
        }
    }

    #[test]
    fn bare_name_resolves_across_kinds() {
        let (model, _dir) = model_with_fixture();
        match model.resolve("edge1").unwrap() {
            Entity::Node(n) => assert_eq!(n.name().unwrap(), "edge1"),
            other => panic!("expected a node, got other variant: {}", matches!(other, Entity::Many(_))),
        }
    }

    #[test]
    fn device_metric_lookup_by_name() {
        let (model, _dir) = model_with_fixture();
        let device = model.get_device(Some("plant1"), Some("edge1"), "pump1").unwrap();
        let metric = device[0].metric_named("temperature").unwrap();
        assert_eq!(metric.metric_type().unwrap(), "float");

        let store = metric.store.clone();
        let _ = store.append_metric_sample(metric.id(), &MetricValue::Double(99.0), 10);
        let value = metric.value().unwrap().unwrap();
        assert_eq!(value.value, MetricValue::Double(99.0));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let (model, _dir) = model_with_fixture();
        assert!(model.resolve("no-such-thing").is_err());
    }
}
