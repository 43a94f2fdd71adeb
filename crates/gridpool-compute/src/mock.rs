//! In-memory compute backend for tests.
//!
//! Holds instances and images in process memory, enforces the label and
//! metadata fingerprint protocol (a stale fingerprint fails the write the
//! way the real backend does), evaluates the filter expressions the
//! search layer builds, and lets tests script per-zone insert outcomes
//! and multi-poll operation completion. Every backend call is recorded
//! for never-called assertions.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::ComputeBackend;
use crate::error::{ComputeError, ComputeResult};
use crate::types::{
    AccessConfig, Image, Instance, InstanceStatus, InstanceTemplate, Labels, Metadata,
    NetworkInterface, Operation, OperationError, OperationStatus,
};

/// Scripted result of the next `insert_instance` call in a zone.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Success,
    /// The operation completes DONE but carries this error code.
    FailWith(&'static str),
}

struct TrackedOp {
    op: Operation,
    remaining_polls: u32,
}

#[derive(Default)]
struct MockState {
    instances: BTreeMap<(String, String), Instance>,
    images: Vec<Image>,
    operations: HashMap<(String, String), TrackedOp>,
    insert_scripts: HashMap<String, VecDeque<InsertOutcome>>,
    calls: Vec<String>,
    op_seq: u64,
    fingerprint_seq: u64,
    id_seq: u64,
    /// Polls an operation needs before reporting DONE (0 = immediate).
    op_poll_steps: u32,
}

/// Scripted in-memory [`ComputeBackend`].
#[derive(Clone)]
pub struct MockCompute {
    state: Arc<Mutex<MockState>>,
}

impl MockCompute {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                id_seq: 1000,
                ..MockState::default()
            })),
        }
    }

    /// Make newly created operations step PENDING → RUNNING → DONE over
    /// `steps` polls instead of completing immediately.
    pub fn set_op_poll_steps(&self, steps: u32) {
        self.state.lock().unwrap().op_poll_steps = steps;
    }

    /// Queue the outcome of the next `insert_instance` call in `zone`.
    pub fn script_insert(&self, zone: &str, outcome: InsertOutcome) {
        self.state
            .lock()
            .unwrap()
            .insert_scripts
            .entry(zone.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn add_instance(&self, instance: Instance) {
        let mut state = self.state.lock().unwrap();
        state
            .instances
            .insert((instance.zone.clone(), instance.name.clone()), instance);
    }

    pub fn add_image(&self, image: Image) {
        self.state.lock().unwrap().images.push(image);
    }

    /// Snapshot of an instance, bypassing the backend API (no call log).
    pub fn instance(&self, zone: &str, name: &str) -> Option<Instance> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
    }

    /// Mutate an instance in place, e.g. to simulate an external writer
    /// racing the caller. Bumps the label fingerprint.
    pub fn tamper_instance(&self, zone: &str, name: &str, f: impl FnOnce(&mut Instance)) {
        let mut state = self.state.lock().unwrap();
        let next_fp = state.next_fingerprint();
        if let Some(inst) = state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            f(inst);
            inst.label_fingerprint = next_fp;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .any(|c| c.starts_with(prefix))
    }
}

impl Default for MockCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    fn next_fingerprint(&mut self) -> String {
        self.fingerprint_seq += 1;
        format!("fp-{}", self.fingerprint_seq)
    }

    fn new_operation(&mut self, zone: &str, verb: &str, target: Option<String>) -> Operation {
        self.op_seq += 1;
        let steps = self.op_poll_steps;
        let op = Operation {
            name: format!("op-{}", self.op_seq),
            zone: zone.to_string(),
            operation_type: verb.to_string(),
            status: if steps == 0 {
                OperationStatus::Done
            } else {
                OperationStatus::Pending
            },
            target_link: target,
            http_error_status_code: None,
            errors: Vec::new(),
        };
        self.operations.insert(
            (zone.to_string(), op.name.clone()),
            TrackedOp {
                op: op.clone(),
                remaining_polls: steps,
            },
        );
        op
    }

    fn failed_operation(&mut self, zone: &str, verb: &str, code: &str) -> Operation {
        let mut op = self.new_operation(zone, verb, None);
        op.status = OperationStatus::Done;
        op.http_error_status_code = Some(503);
        op.errors.push(OperationError {
            code: code.to_string(),
            message: format!("scripted failure: {code}"),
        });
        if let Some(tracked) = self.operations.get_mut(&(zone.to_string(), op.name.clone())) {
            tracked.op = op.clone();
            tracked.remaining_polls = 0;
        }
        op
    }
}

fn target_link(zone: &str, name: &str) -> Option<String> {
    Some(format!("mock://compute/zones/{zone}/instances/{name}"))
}

#[async_trait]
impl ComputeBackend for MockCompute {
    async fn get_instance(&self, zone: &str, name: &str) -> ComputeResult<Option<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("get_instance {zone}/{name}"));
        Ok(state
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_instances(
        &self,
        zone: &str,
        filter: &str,
        max_results: u32,
    ) -> ComputeResult<Vec<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("list_instances {zone} {filter}"));
        let hits = state
            .instances
            .values()
            .filter(|inst| inst.zone == zone)
            .filter(|inst| {
                filter::matches(filter, &|key| match key {
                    "name" => Some(inst.name.clone()),
                    "status" => Some(inst.status.as_str().to_string()),
                    _ => key
                        .strip_prefix("labels.")
                        .and_then(|k| inst.labels.get(k).cloned()),
                })
            })
            .take(max_results as usize)
            .cloned()
            .collect();
        Ok(hits)
    }

    async fn insert_instance(
        &self,
        zone: &str,
        template: &InstanceTemplate,
    ) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("insert_instance {zone} {}", template.name));

        let outcome = state
            .insert_scripts
            .get_mut(zone)
            .and_then(VecDeque::pop_front)
            .unwrap_or(InsertOutcome::Success);

        match outcome {
            InsertOutcome::FailWith(code) => Ok(state.failed_operation(zone, "insert", code)),
            InsertOutcome::Success => {
                state.id_seq += 1;
                let id = state.id_seq;
                let label_fp = state.next_fingerprint();
                let metadata_fp = state.next_fingerprint();
                let instance = Instance {
                    name: template.name.clone(),
                    id,
                    zone: zone.to_string(),
                    status: InstanceStatus::Running,
                    machine_type: template.machine_type.clone(),
                    service_account: template.service_account.clone(),
                    network_interfaces: vec![NetworkInterface {
                        network: template.network.clone(),
                        internal_ip: Some(format!("10.0.0.{}", id % 250)),
                        access_configs: if template.external_ip {
                            vec![AccessConfig {
                                name: "external-nat".to_string(),
                                external_ip: Some(format!("34.1.2.{}", id % 250)),
                            }]
                        } else {
                            Vec::new()
                        },
                    }],
                    disks: vec![template.boot_disk.clone()],
                    labels: template.labels.clone(),
                    label_fingerprint: label_fp,
                    metadata: template.metadata.clone(),
                    metadata_fingerprint: metadata_fp,
                    preemptible: template.preemptible,
                };
                state
                    .instances
                    .insert((zone.to_string(), template.name.clone()), instance);
                Ok(state.new_operation(zone, "insert", target_link(zone, &template.name)))
            }
        }
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("delete_instance {zone}/{name}"));
        if state
            .instances
            .remove(&(zone.to_string(), name.to_string()))
            .is_none()
        {
            return Err(ComputeError::NotFound(format!("instance {zone}/{name}")));
        }
        Ok(state.new_operation(zone, "delete", target_link(zone, name)))
    }

    async fn start_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("start_instance {zone}/{name}"));
        match state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            Some(inst) => {
                inst.status = InstanceStatus::Running;
                Ok(state.new_operation(zone, "start", target_link(zone, name)))
            }
            None => Err(ComputeError::NotFound(format!("instance {zone}/{name}"))),
        }
    }

    async fn stop_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("stop_instance {zone}/{name}"));
        match state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            Some(inst) => {
                inst.status = InstanceStatus::Terminated;
                Ok(state.new_operation(zone, "stop", target_link(zone, name)))
            }
            None => Err(ComputeError::NotFound(format!("instance {zone}/{name}"))),
        }
    }

    async fn set_labels(
        &self,
        zone: &str,
        name: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("set_labels {zone}/{name}"));
        let next_fp = state.next_fingerprint();
        let inst = state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::NotFound(format!("instance {zone}/{name}")))?;
        if inst.label_fingerprint != fingerprint {
            return Err(ComputeError::PreconditionFailed(format!(
                "label fingerprint mismatch on {name}: sent {fingerprint}, current {}",
                inst.label_fingerprint
            )));
        }
        inst.labels = labels.clone();
        inst.label_fingerprint = next_fp;
        Ok(state.new_operation(zone, "setLabels", target_link(zone, name)))
    }

    async fn set_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: &Metadata,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("set_metadata {zone}/{name}"));
        let next_fp = state.next_fingerprint();
        let inst = state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::NotFound(format!("instance {zone}/{name}")))?;
        if inst.metadata_fingerprint != fingerprint {
            return Err(ComputeError::PreconditionFailed(format!(
                "metadata fingerprint mismatch on {name}: sent {fingerprint}, current {}",
                inst.metadata_fingerprint
            )));
        }
        inst.metadata = metadata.clone();
        inst.metadata_fingerprint = next_fp;
        Ok(state.new_operation(zone, "setMetadata", target_link(zone, name)))
    }

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("set_machine_type {zone}/{name} {machine_type}"));
        let inst = state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::NotFound(format!("instance {zone}/{name}")))?;
        inst.machine_type = machine_type.to_string();
        Ok(state.new_operation(zone, "setMachineType", target_link(zone, name)))
    }

    async fn set_service_account(
        &self,
        zone: &str,
        name: &str,
        email: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("set_service_account {zone}/{name} {email}"));
        let inst = state
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::NotFound(format!("instance {zone}/{name}")))?;
        inst.service_account = Some(email.to_string());
        Ok(state.new_operation(zone, "setServiceAccount", target_link(zone, name)))
    }

    async fn get_image_from_family(&self, family: &str) -> ComputeResult<Option<Image>> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("get_image_from_family {family}"));
        Ok(state.images.iter().find(|i| i.family == family).cloned())
    }

    async fn list_images(&self, filter: &str, max_results: u32) -> ComputeResult<Vec<Image>> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("list_images {filter}"));
        let hits = state
            .images
            .iter()
            .filter(|img| {
                filter::matches(filter, &|key| match key {
                    "name" => Some(img.name.clone()),
                    "family" => Some(img.family.clone()),
                    _ => key
                        .strip_prefix("labels.")
                        .and_then(|k| img.labels.get(k).cloned()),
                })
            })
            .take(max_results as usize)
            .cloned()
            .collect();
        Ok(hits)
    }

    async fn get_zone_operation(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("get_zone_operation {zone}/{name}"));
        let tracked = state
            .operations
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| ComputeError::NotFound(format!("operation {zone}/{name}")))?;
        if tracked.remaining_polls > 0 {
            tracked.remaining_polls -= 1;
            tracked.op.status = if tracked.remaining_polls == 0 {
                OperationStatus::Done
            } else {
                OperationStatus::Running
            };
        }
        Ok(tracked.op.clone())
    }
}

/// Evaluator for the filter expressions the search layer renders:
/// `(key = "value")` / `(key != "value")` atoms joined by AND or OR,
/// composite groups parenthesized. Malformed input matches nothing.
mod filter {
    pub fn matches(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        let expr = expr.trim();
        if expr.is_empty() {
            return true;
        }
        eval(expr, lookup)
    }

    fn eval(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        let expr = expr.trim();
        let chunks = split_top_level(expr);
        if chunks.len() > 1 {
            let joined_by_or = top_level_joiner(expr) == Some("OR");
            return if joined_by_or {
                chunks.iter().any(|c| eval(c, lookup))
            } else {
                chunks.iter().all(|c| eval(c, lookup))
            };
        }
        if let Some(inner) = strip_outer_parens(expr) {
            return eval(inner, lookup);
        }
        eval_atom(expr, lookup)
    }

    fn eval_atom(atom: &str, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        let (key, op, value) = if let Some((k, v)) = atom.split_once(" != ") {
            (k, "!=", v)
        } else if let Some((k, v)) = atom.split_once(" = ") {
            (k, "=", v)
        } else {
            return false;
        };
        let value = value.trim().trim_matches('"');
        let actual = lookup(key.trim());
        match op {
            "=" => actual.as_deref() == Some(value),
            _ => actual.as_deref() != Some(value),
        }
    }

    /// Split on AND/OR joiners at parenthesis depth zero.
    fn split_top_level(expr: &str) -> Vec<&str> {
        let mut chunks = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        let bytes = expr.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            if depth == 0 {
                let joiner_len = if expr[i..].starts_with(" AND ") {
                    Some(5)
                } else if expr[i..].starts_with(" OR ") {
                    Some(4)
                } else {
                    None
                };
                if let Some(len) = joiner_len {
                    chunks.push(expr[start..i].trim());
                    i += len;
                    start = i;
                    continue;
                }
            }
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            i += 1;
        }
        chunks.push(expr[start..].trim());
        chunks.retain(|c| !c.is_empty());
        chunks
    }

    fn top_level_joiner(expr: &str) -> Option<&'static str> {
        let mut depth = 0usize;
        let bytes = expr.as_bytes();
        for i in 0..bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b' ' if depth == 0 => {
                    if expr[i..].starts_with(" OR ") {
                        return Some("OR");
                    }
                    if expr[i..].starts_with(" AND ") {
                        return Some("AND");
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// If the whole expression is one parenthesized group, return its body.
    fn strip_outer_parens(expr: &str) -> Option<&str> {
        if !expr.starts_with('(') || !expr.ends_with(')') {
            return None;
        }
        let mut depth = 0usize;
        for (i, b) in expr.bytes().enumerate() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && i != expr.len() - 1 {
                        return None;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return None;
        }
        Some(&expr[1..expr.len() - 1])
    }

}
