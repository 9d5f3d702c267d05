// Process context: the runtime facade handed to a component.
//
// Holds the task's identity, parameters, unsealed secrets, its artifact
// storage and a task-local log, and mediates all traffic on the workflow
// topic: publishing records downstream, polling declared inputs from
// upstream, and emitting the final end-of-stream or interruption signal.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use maestro_bus::TopicConsumer;
use maestro_core::datatype::DataRecord;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{BusMessage, Resource, SignalKind};
use maestro_core::secrets::UnsealedSecret;
use maestro_core::servo;
use maestro_storage::ArtifactStore;

use crate::runtime::Runtime;

const LOG_FILE: &str = "log.txt";

pub struct Process {
    /// Task name.
    pub name: String,
    /// Task module key.
    pub module: String,
    /// Workflow id; also the name of the topic this task reads and writes.
    pub parent: String,
    pub params: HashMap<String, Value>,
    pub inputs: IndexMap<String, String>,
    secrets: Vec<UnsealedSecret>,
    storage: Arc<dyn ArtifactStore>,
    runtime: Arc<Runtime>,
    log_path: PathBuf,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        runtime: Arc<Runtime>,
        name: impl Into<String>,
        module: impl Into<String>,
        parent: impl Into<String>,
        params: HashMap<String, Value>,
        inputs: IndexMap<String, String>,
        secrets: Vec<UnsealedSecret>,
        storage: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        let name = name.into();
        let parent = parent.into();

        storage.setup().await?;
        let log_path = storage
            .temp_dir()
            .join(format!(".{parent}-{name}.log"));

        Ok(Self {
            name,
            module: module.into(),
            parent,
            params,
            inputs,
            secrets,
            storage,
            runtime,
            log_path,
        })
    }

    pub fn storage(&self) -> &Arc<dyn ArtifactStore> {
        &self.storage
    }

    /// Unsealed secret value for a token, when the task carries one.
    pub fn secret(&self, token: &str) -> Option<&str> {
        self.secrets
            .iter()
            .find(|s| s.token == token)
            .map(|s| s.secret.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn required_param_str(&self, name: &str) -> Result<String> {
        self.param(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                MaestroError::validation(format!(
                    "task `{}` is missing required parameter `{name}`",
                    self.name
                ))
            })
    }

    pub fn param_str_or(&self, name: &str, default: &str) -> String {
        self.param(name)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    // ============================================
    // Task log
    // ============================================

    pub fn info(&self, message: impl AsRef<str>) {
        tracing::info!(task = %self.name, "{}", message.as_ref());
        self.log_line("INFO", message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        tracing::debug!(task = %self.name, "{}", message.as_ref());
        self.log_line("DEBUG", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        tracing::warn!(task = %self.name, "{}", message.as_ref());
        self.log_line("WARNING", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        tracing::error!(task = %self.name, "{}", message.as_ref());
        self.log_line("ERROR", message.as_ref());
    }

    fn log_line(&self, level: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut log| writeln!(log, "[{level}] [{timestamp}] {message}"));
        if let Err(err) = appended {
            tracing::warn!(task = %self.name, "could not write task log: {err}");
        }
    }

    // ============================================
    // Streaming
    // ============================================

    /// Serialize a record under its self-describing schema and publish it
    /// on the workflow topic as a BLOCK keyed `"<task>.<record>"`.
    pub async fn to_downstream(&self, record: &DataRecord) -> Result<BusMessage> {
        let schema = record.get_schema();
        let dict = record.get_dict()?;
        let data = servo::serialize(&dict, &schema)?;

        let message_key = format!("{}.{}", self.name, record.name());
        let message = BusMessage::block(message_key.clone(), data, schema.to_string());

        self.debug(format!("Sending {message_key} to downstream"));
        self.send(&message).await?;

        Ok(message)
    }

    /// Publish an envelope keyed by this task's name.
    async fn send(&self, message: &BusMessage) -> Result<()> {
        let payload = servo::encode_message(message)?;
        let producer = self.runtime.producer()?;
        producer
            .send(&self.parent, self.name.as_bytes(), &payload)
            .await
    }

    /// Publish a signal addressed to every task of the workflow, keyed by
    /// the workflow id itself.
    pub async fn broadcast_signal(&self, kind: SignalKind) -> Result<()> {
        let payload = servo::encode_message(&BusMessage::signal(kind))?;
        let producer = self.runtime.producer()?;
        producer
            .send(&self.parent, self.parent.as_bytes(), &payload)
            .await
    }

    /// A consumer on an auxiliary topic, e.g. `"<workflow>-<task>"` for
    /// dynamic parameters.
    pub fn topic_consumer(&self, topic: &str) -> Result<TopicConsumer> {
        self.runtime.consumer(topic)
    }

    /// Start polling records from the declared input task(s).
    ///
    /// Records from tasks outside the declared set are ignored, except for
    /// control signals keyed by the workflow id, which address everyone.
    pub fn poll_from_upstream(&self, apply_servo: bool) -> Result<UpstreamPoller<'_>> {
        if self.inputs.is_empty() {
            return Err(MaestroError::validation(
                "tried to poll from upstream, but no input is declared",
            ));
        }

        let state = UpstreamState::new(&self.parent, &self.inputs);
        self.debug(format!(
            "Declared input tasks ({}): {:?}, expected inputs: {:?}",
            state.total_tasks(),
            state.expected_tasks,
            state.remaining,
        ));

        let consumer = self.runtime.consumer(&self.parent)?;
        Ok(UpstreamPoller {
            process: self,
            consumer,
            state,
            apply_servo,
        })
    }

    /// Wait for every declared input and collect the payloads per local
    /// input name.
    pub async fn get_from_upstream(&self) -> Result<HashMap<String, Vec<Value>>> {
        let mut poller = self.poll_from_upstream(true)?;
        let mut messages: HashMap<String, Vec<Value>> = HashMap::new();

        while let Some((local_name, payload)) = poller.next().await? {
            if let UpstreamPayload::Record(value) = payload {
                messages.entry(local_name).or_default().push(value);
            }
        }

        Ok(messages)
    }

    /// Upload the task log, optionally clear the scratch dir (always keeping
    /// the log as `log.txt.old`), and emit the task's final signal:
    /// POISSON_PILL on a graceful close, INTERRUPTION on a forced one.
    pub async fn close(&self, force_interruption: bool, remove_local_dir: bool) -> Result<Resource> {
        if force_interruption {
            self.error("Task brutally interrupted");
        } else {
            self.debug("Task gracefully closed");
        }

        let log_remote = self.storage.put_file(&self.log_path, Some(LOG_FILE)).await?;
        let _ = std::fs::remove_file(&self.log_path);

        if remove_local_dir {
            self.storage.remove_local_dir(&[LOG_FILE])?;
        }

        let kind = if force_interruption {
            SignalKind::Interruption
        } else {
            SignalKind::PoissonPill
        };
        self.send(&BusMessage::signal(kind)).await?;

        Ok(log_remote)
    }
}

/// Payload yielded for one BLOCK: decoded under its inline schema, or the
/// raw bytes when decoding was not requested.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload {
    Record(Value),
    Raw(Vec<u8>),
}

/// Pull-based iterator over the declared upstream inputs.
pub struct UpstreamPoller<'a> {
    process: &'a Process,
    consumer: TopicConsumer,
    state: UpstreamState,
    apply_servo: bool,
}

impl UpstreamPoller<'_> {
    /// The next `(local_input_name, payload)` pair, or `None` once every
    /// upstream task has signalled end-of-stream.
    pub async fn next(&mut self) -> Result<Option<(String, UpstreamPayload)>> {
        loop {
            if self.state.complete() {
                self.state.finish()?;
                return Ok(None);
            }

            let record = self.consumer.recv().await?;
            let producer = String::from_utf8_lossy(&record.key).to_string();
            if !self.state.relevant(&producer) {
                continue;
            }

            let message = servo::decode_message(&record.payload)?;
            match self.state.observe(&producer, message)? {
                UpstreamStep::Ignored => continue,
                UpstreamStep::Pill => {
                    self.process
                        .debug(format!("Received POISSON_PILL signal from task {producer}"));
                    continue;
                }
                UpstreamStep::Block {
                    local_name,
                    data,
                    schema,
                } => {
                    self.process
                        .debug(format!("Received block from task {producer}"));
                    let payload = if self.apply_servo {
                        let schema: Value = serde_json::from_str(&schema).map_err(|e| {
                            MaestroError::bus(format!("invalid inline schema: {e}"))
                        })?;
                        UpstreamPayload::Record(servo::deserialize(&data, &schema)?)
                    } else {
                        UpstreamPayload::Raw(data)
                    };
                    return Ok(Some((local_name, payload)));
                }
            }
        }
    }
}

/// What one observed envelope meant to the polling protocol.
#[derive(Debug, PartialEq)]
enum UpstreamStep {
    /// Undeclared block key; dropped silently.
    Ignored,
    /// An end-of-stream marker from one upstream task.
    Pill,
    Block {
        local_name: String,
        data: Vec<u8>,
        schema: String,
    },
}

/// The upstream-polling state machine, independent of the broker so the
/// protocol can be exercised directly.
struct UpstreamState {
    workflow_id: String,
    expected_tasks: HashSet<String>,
    /// Multiset of `"<task>.<record>"` keys still owed by upstream.
    remaining: Vec<String>,
    /// `"<task>.<record>"` back to the local input name.
    reversed: HashMap<String, String>,
    pills: usize,
}

impl UpstreamState {
    fn new(workflow_id: &str, inputs: &IndexMap<String, String>) -> Self {
        let expected_tasks = inputs
            .values()
            .filter_map(|v| v.split('.').next())
            .map(str::to_string)
            .collect();
        let remaining = inputs.values().cloned().collect();
        let reversed = inputs
            .iter()
            .map(|(local, key)| (key.clone(), local.clone()))
            .collect();

        Self {
            workflow_id: workflow_id.to_string(),
            expected_tasks,
            remaining,
            reversed,
            pills: 0,
        }
    }

    fn total_tasks(&self) -> usize {
        self.expected_tasks.len()
    }

    /// Whether a producer's records concern this task at all. The workflow
    /// id is reserved for control signals addressed to every task.
    fn relevant(&self, producer: &str) -> bool {
        self.expected_tasks.contains(producer) || producer == self.workflow_id
    }

    fn complete(&self) -> bool {
        self.pills >= self.expected_tasks.len()
    }

    fn observe(&mut self, producer: &str, message: BusMessage) -> Result<UpstreamStep> {
        if !self.relevant(producer) {
            return Ok(UpstreamStep::Ignored);
        }

        if message.is_signal() {
            return match message.signal_kind()? {
                SignalKind::Interruption => Err(MaestroError::UpstreamInterrupted),
                SignalKind::PoissonPill => {
                    self.pills += 1;
                    Ok(UpstreamStep::Pill)
                }
            };
        }

        if !message.is_block() {
            return Err(MaestroError::bus(format!(
                "unrecognized message type `{}`",
                message.message_type
            )));
        }

        // Upstream tasks may publish records this task never declared.
        let Some(local_name) = self.reversed.get(&message.key) else {
            return Ok(UpstreamStep::Ignored);
        };

        if let Some(position) = self.remaining.iter().position(|k| k == &message.key) {
            self.remaining.remove(position);
        }

        Ok(UpstreamStep::Block {
            local_name: local_name.clone(),
            data: message.data,
            schema: message.schem,
        })
    }

    /// After every pill arrived, any leftover expected key is an error.
    fn finish(&self) -> Result<()> {
        if !self.remaining.is_empty() {
            return Err(MaestroError::MissingInputs(self.remaining.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point_block(key: &str) -> BusMessage {
        let schema = json!({
            "type": "record",
            "name": "Point",
            "namespace": "tests",
            "fields": [
                {"name": "x", "type": "int"},
                {"name": "y", "type": "int"},
            ],
        });
        let data = servo::serialize(&json!({"x": 1, "y": 2}), &schema).unwrap();
        BusMessage::block(key, data, schema.to_string())
    }

    fn single_input() -> IndexMap<String, String> {
        IndexMap::from([("point".to_string(), "T0.Point".to_string())])
    }

    fn decode(step: UpstreamStep) -> (String, Value) {
        match step {
            UpstreamStep::Block {
                local_name,
                data,
                schema,
            } => {
                let schema: Value = serde_json::from_str(&schema).unwrap();
                (local_name, servo::deserialize(&data, &schema).unwrap())
            }
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn yields_declared_blocks_then_stops_on_pill() {
        let mut state = UpstreamState::new("wf", &single_input());

        let step = state.observe("T0", point_block("T0.Point")).unwrap();
        let (local_name, value) = decode(step);
        assert_eq!(local_name, "point");
        assert_eq!(value, json!({"x": 1, "y": 2}));

        assert!(!state.complete());
        let step = state
            .observe("T0", BusMessage::signal(SignalKind::PoissonPill))
            .unwrap();
        assert_eq!(step, UpstreamStep::Pill);
        assert!(state.complete());
        assert!(state.finish().is_ok());
    }

    #[test]
    fn pill_without_blocks_means_missing_inputs() {
        let mut state = UpstreamState::new("wf", &single_input());

        state
            .observe("T0", BusMessage::signal(SignalKind::PoissonPill))
            .unwrap();
        assert!(state.complete());

        let err = state.finish().unwrap_err();
        match err {
            MaestroError::MissingInputs(keys) => assert_eq!(keys, vec!["T0.Point".to_string()]),
            other => panic!("expected MissingInputs, got {other}"),
        }
    }

    #[test]
    fn interruption_fails_the_poll() {
        let mut state = UpstreamState::new("wf", &single_input());
        let err = state
            .observe("T0", BusMessage::signal(SignalKind::Interruption))
            .unwrap_err();
        assert!(matches!(err, MaestroError::UpstreamInterrupted));
    }

    #[test]
    fn workflow_keyed_interruption_reaches_every_task() {
        let mut state = UpstreamState::new("wf", &single_input());
        assert!(state.relevant("wf"));
        let err = state
            .observe("wf", BusMessage::signal(SignalKind::Interruption))
            .unwrap_err();
        assert!(matches!(err, MaestroError::UpstreamInterrupted));
    }

    #[test]
    fn foreign_producers_are_ignored() {
        let mut state = UpstreamState::new("wf", &single_input());
        assert!(!state.relevant("T9"));
        let step = state.observe("T9", point_block("T9.Point")).unwrap();
        assert_eq!(step, UpstreamStep::Ignored);
    }

    #[test]
    fn undeclared_block_keys_are_discarded_silently() {
        let mut state = UpstreamState::new("wf", &single_input());
        let step = state.observe("T0", point_block("T0.Other")).unwrap();
        assert_eq!(step, UpstreamStep::Ignored);
        assert_eq!(state.remaining, vec!["T0.Point".to_string()]);
    }

    #[test]
    fn waits_for_a_pill_from_every_distinct_upstream() {
        let inputs = IndexMap::from([
            ("first".to_string(), "T0.Data".to_string()),
            ("second".to_string(), "T1.Data".to_string()),
        ]);
        let mut state = UpstreamState::new("wf", &inputs);
        assert_eq!(state.total_tasks(), 2);

        state.observe("T0", point_block("T0.Data")).unwrap();
        state
            .observe("T0", BusMessage::signal(SignalKind::PoissonPill))
            .unwrap();
        assert!(!state.complete());

        state.observe("T1", point_block("T1.Data")).unwrap();
        state
            .observe("T1", BusMessage::signal(SignalKind::PoissonPill))
            .unwrap();
        assert!(state.complete());
        assert!(state.finish().is_ok());
    }

    #[test]
    fn duplicate_blocks_are_yielded_again() {
        // the bus is at-least-once: a redelivered block is handed to the
        // component again rather than dropped
        let mut state = UpstreamState::new("wf", &single_input());

        state.observe("T0", point_block("T0.Point")).unwrap();
        let step = state.observe("T0", point_block("T0.Point")).unwrap();
        assert!(matches!(step, UpstreamStep::Block { .. }));
        assert!(state.remaining.is_empty());
    }
}
