//! 对话任务的步骤状态，以SSE事件推送给前端
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub const EVENT_PIPELINE: &str = "pipeline";
pub const EVENT_MESSAGE: &str = "message";
pub const CLOSE: &str = "CLOSE";

/// 对话步骤使用的前端容器
pub const STEP_CHAT: &str = "chat";

/// 推送到SSE的一条事件
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub name: &'static str,
    pub data: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Step {
    pub status: StepStatus,
    pub message: Option<String>,
    pub container: String,
}

/// 一次对话任务的全部步骤。每次变更都会推送全部步骤的最新状态。
pub struct Pipeline {
    steps: BTreeMap<i32, Step>,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl Pipeline {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            steps: BTreeMap::new(),
            tx,
        }
    }

    pub fn init_step(&mut self, step_id: i32, container: &str) {
        self.steps.insert(
            step_id,
            Step {
                status: StepStatus::Pending,
                message: None,
                container: container.to_string(),
            },
        );
        self.send_pipeline_event();
    }

    pub fn update_step(&mut self, step_id: i32, message: &str) {
        if let Some(step) = self.steps.get_mut(&step_id) {
            step.message = Some(message.to_string());
            self.send_pipeline_event();
        }
    }

    pub fn complete_step(&mut self, step_id: i32) {
        if let Some(step) = self.steps.get_mut(&step_id) {
            step.status = StepStatus::Completed;
            self.send_pipeline_event();
        }
    }

    pub fn fail_step(&mut self, step_id: i32, error_message: &str) {
        if let Some(step) = self.steps.get_mut(&step_id) {
            step.status = StepStatus::Failed;
            step.message = Some(error_message.to_string());
            self.send_pipeline_event();
        }
    }

    pub fn steps(&self) -> &BTreeMap<i32, Step> {
        &self.steps
    }

    /// 结束任务。发送CLOSE后通道随之关闭。
    pub fn close(self) {
        self.send(EVENT_MESSAGE, CLOSE.to_string());
    }

    fn send_pipeline_event(&self) {
        match serde_json::to_string(&self.steps) {
            Ok(json) => self.send(EVENT_PIPELINE, json),
            Err(e) => tracing::error!("序列化步骤状态失败：{e}"),
        }
    }

    fn send(&self, name: &'static str, data: String) {
        // 订阅方已断开时丢弃事件
        if self.tx.send(StreamEvent { name, data }).is_err() {
            tracing::debug!("Stream receiver dropped, event {name} discarded");
        }
    }
}
