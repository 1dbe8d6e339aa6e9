#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use prompt_lab_core::{
    CoreError, DatasetRow, ModelId, ModelProvider, ModelResponse, ModelTarget, PromptId, PromptVersion,
    Result, TokenUsage,
};
use prompt_lab_core::ModelCaller;
use prompt_lab_engine::{ProgressEvent, ProgressSubscription, TestMatrix};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

mock! {
    pub Caller {}

    #[async_trait]
    impl ModelCaller for Caller {
        async fn call(&self, prompt_content: &str, model_id: ModelId, row_data: &Value) -> Result<ModelResponse>;
    }
}

/// `prompts` x `models` x `rows`; every template renders to `P{p}:{{n}}` with `n` the row index.
pub fn matrix(prompts: usize, models: usize, rows: usize) -> TestMatrix {
    TestMatrix::new(
        (0..prompts)
            .map(|p| PromptVersion::new(PromptId::new(), format!("prompt-{}", p), 1, format!("P{}:{{{{n}}}}", p)))
            .collect(),
        (0..models)
            .map(|m| ModelTarget::new(format!("model-{}", m), ModelProvider::Local, format!("local-{}", m)))
            .collect(),
        (0..rows as i64).map(|n| DatasetRow::new(n, json!({ "n": n }))).collect(),
    )
}

pub fn response(output: &str) -> ModelResponse {
    ModelResponse {
        output: output.to_string(),
        latency_ms: 100,
        tokens: TokenUsage::new(20, 10),
        cost: Decimal::new(1, 3),
    }
}

/// Drains whatever is buffered on the subscription.
pub fn drain(subscription: &mut ProgressSubscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

pub fn completed_counts(events: &[ProgressEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress { completed, .. } => Some(*completed),
            _ => None,
        })
        .collect()
}

/// Blocks every call until the test hands out a permit, and reports each
/// prompt as the call starts.
pub struct GatedCaller {
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
    failing: Mutex<HashSet<String>>,
}

impl GatedCaller {
    pub fn new() -> (Arc<Self>, Arc<Semaphore>, mpsc::UnboundedReceiver<String>) {
        Self::failing_once(Vec::<String>::new())
    }

    /// Like [`GatedCaller::new`], but the first call for each listed prompt
    /// fails once its permit is handed out.
    pub fn failing_once<I, S>(failing: I) -> (Arc<Self>, Arc<Semaphore>, mpsc::UnboundedReceiver<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gate = Arc::new(Semaphore::new(0));
        let (started, started_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                gate: gate.clone(),
                started,
                failing: Mutex::new(failing.into_iter().map(Into::into).collect()),
            }),
            gate,
            started_rx,
        )
    }
}

#[async_trait]
impl ModelCaller for GatedCaller {
    async fn call(&self, prompt_content: &str, _model_id: ModelId, _row_data: &Value) -> Result<ModelResponse> {
        let _ = self.started.send(prompt_content.to_string());
        self.gate
            .acquire()
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .forget();
        if self.failing.lock().unwrap().remove(prompt_content) {
            return Err(CoreError::Provider(format!("upstream refused {}", prompt_content)));
        }
        Ok(response(prompt_content))
    }
}

/// Panics on the first call, succeeds afterwards.
#[derive(Default)]
pub struct PanicOnceCaller {
    panicked: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ModelCaller for PanicOnceCaller {
    async fn call(&self, prompt_content: &str, _model_id: ModelId, _row_data: &Value) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("provider client crashed on {}", prompt_content);
        }
        Ok(response(prompt_content))
    }
}

/// Fails the first call for every prompt listed, succeeds otherwise.
pub struct FlakyCaller {
    failing: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl FlakyCaller {
    pub fn new<I, S>(failing: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            failing: Mutex::new(failing.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelCaller for FlakyCaller {
    async fn call(&self, prompt_content: &str, _model_id: ModelId, _row_data: &Value) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().remove(prompt_content) {
            return Err(CoreError::Provider(format!("upstream refused {}", prompt_content)));
        }
        Ok(response(prompt_content))
    }
}

/// Sleeps for a fixed time and tracks how many calls overlap.
pub struct SleepyCaller {
    delay: Duration,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl SleepyCaller {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelCaller for SleepyCaller {
    async fn call(&self, prompt_content: &str, _model_id: ModelId, _row_data: &Value) -> Result<ModelResponse> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(response(prompt_content))
    }
}
