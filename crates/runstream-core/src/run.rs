//! Run state machine.
//!
//! A [`Run`] owns one transcript and its derived state. Inbound frames are
//! applied with [`Run::handle_frame`], which reports what changed as a list
//! of [`RunEffect`]s. User actions are methods that update local state and
//! hand back the frame to send, or `None` when the action does nothing in
//! the current state.

use crate::classifier::{classify, Classification};
use crate::content::SidePanel;
use crate::plan::plan_steps_to_json_string;
use crate::progress::{self, Progress};
use crate::store::{MergeOutcome, MessageStore};
use crate::visibility::Visibility;
use crate::Result;
use runstream_types::{
    AgentMessage, InboundFrame, InputRequest, InputResponsePayload, Message, Plan, PlanStep,
    OutboundFrame, ReportedStatus, RunStatus, SavedPlan, SessionId, TaskPayload, TeamConfig,
    TeamResult,
};
use serde_json::Value;

pub const CANCEL_REASON: &str = "Cancelled by user";
pub const REGENERATE_PLAN_PROMPT: &str = "Regenerate a plan that improves on the current plan";
const DEFAULT_ACCEPT_TEXT: &str = "Plan Accepted";

/// Observable consequence of applying a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEffect {
    Appended { index: usize },
    Merged { index: usize },
    /// Reported status changed to this value
    StatusChanged(ReportedStatus),
    InputRequested(InputRequest),
    /// The hidden set changed
    VisibilityChanged,
    /// Code or browser panel state changed
    PanelChanged,
    /// The backend is done with this socket
    CloseSocket,
}

#[derive(Debug, Clone)]
pub struct Run {
    id: String,
    session_id: SessionId,
    status: RunStatus,
    store: MessageStore,
    classification: Classification,
    visibility: Visibility,
    panel: SidePanel,
    input_request: Option<InputRequest>,
    team_config: TeamConfig,
    team_result: Option<TeamResult>,
    error_message: Option<String>,
    /// Plan edits made while a plan awaits approval
    pending_plan: Option<Vec<PlanStep>>,
    last_reported: ReportedStatus,
}

impl Run {
    pub fn new(session_id: SessionId, id: impl Into<String>, team_config: TeamConfig) -> Self {
        let id = id.into();
        Self {
            store: MessageStore::new(session_id, id.clone()),
            id,
            session_id,
            status: RunStatus::Created,
            classification: Classification::default(),
            visibility: Visibility::new(),
            panel: SidePanel::default(),
            input_request: None,
            team_config,
            team_result: None,
            error_message: None,
            pending_plan: None,
            last_reported: ReportedStatus::Stored(RunStatus::Created),
        }
    }

    /// Rebuild a run from a persisted transcript. Classification, the
    /// cascade and side-panel state are replayed over it.
    pub fn restore(
        session_id: SessionId,
        id: impl Into<String>,
        team_config: TeamConfig,
        status: RunStatus,
        messages: Vec<Message>,
    ) -> Self {
        let mut run = Self::new(session_id, id, team_config);
        run.store = MessageStore::restore(session_id, run.id.clone(), messages);
        run.status = status;
        run.panel = SidePanel::replay(run.store.messages());

        for index in 0..run.store.len() {
            let prefix = &run.store.messages()[..=index];
            let classification = classify(prefix);
            run.visibility
                .on_arrival(prefix, &classification.repeated, index);
        }
        run.classification = classify(run.store.messages());
        run.last_reported = run.reported_status();
        tracing::debug!(
            target: "runstream::run",
            run_id = %run.id,
            messages = run.store.len(),
            "Restored run"
        );
        run
    }

    // ==================== Accessors ====================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn is_repeated(&self, index: usize) -> bool {
        self.classification.repeated.contains(&index)
    }

    pub fn is_failed(&self, index: usize) -> bool {
        self.classification.failed.contains(&index)
    }

    pub fn is_hidden(&self, index: usize) -> bool {
        self.visibility.is_hidden(index)
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn panel(&self) -> &SidePanel {
        &self.panel
    }

    pub fn input_request(&self) -> Option<&InputRequest> {
        self.input_request.as_ref()
    }

    pub fn team_config(&self) -> &TeamConfig {
        &self.team_config
    }

    pub fn team_result(&self) -> Option<&TeamResult> {
        self.team_result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn pending_plan(&self) -> Option<&[PlanStep]> {
        self.pending_plan.as_deref()
    }

    /// Status as observers see it.
    ///
    /// While awaiting input right after a final answer (last or second to
    /// last message) this is `final_answer_awaiting_input`.
    pub fn reported_status(&self) -> ReportedStatus {
        if self.status == RunStatus::AwaitingInput {
            let messages = self.store.messages();
            let after_final = messages
                .iter()
                .rev()
                .take(2)
                .any(Message::is_text_final_answer);
            if after_final {
                return ReportedStatus::FinalAnswerAwaitingInput;
            }
        }
        ReportedStatus::Stored(self.status.clone())
    }

    /// The reported status, if it changed since the last call.
    pub fn take_status_change(&mut self) -> Option<ReportedStatus> {
        let current = self.reported_status();
        if current == self.last_reported {
            return None;
        }
        self.last_reported = current.clone();
        Some(current)
    }

    pub fn progress(&self) -> Progress {
        progress::progress(self.messages(), &self.status)
    }

    pub fn current_plan(&self) -> Option<Plan> {
        progress::current_plan(self.messages())
    }

    pub fn has_final_answer(&self) -> bool {
        progress::has_final_answer(self.messages())
    }

    pub fn is_planning(&self) -> bool {
        progress::is_planning(self.messages(), &self.status)
    }

    pub fn is_plan_editable(&self) -> bool {
        progress::is_plan_editable(self.messages(), &self.status)
    }

    /// Local status transitions driven by the connection, not the backend.
    pub fn set_status(&mut self, status: RunStatus) {
        if self.status != status {
            tracing::debug!(target: "runstream::run", from = %self.status, to = %status, "Status changed");
            self.status = status;
        }
    }

    // ==================== Inbound ====================

    /// Parse and apply a raw text frame. Malformed frames are logged and
    /// dropped.
    pub fn handle_text(&mut self, text: &str) -> Vec<RunEffect> {
        match InboundFrame::parse(text) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                tracing::warn!(target: "runstream::run", "Dropping malformed frame: {}", e);
                Vec::new()
            }
        }
    }

    pub fn handle_frame(&mut self, frame: InboundFrame) -> Vec<RunEffect> {
        let mut effects = Vec::new();
        let mut close_socket = false;

        match frame {
            InboundFrame::System { status } => {
                self.set_status(status);
            }
            InboundFrame::Error { error } => {
                let error = error.unwrap_or_else(|| "Unknown error".to_string());
                tracing::warn!(target: "runstream::run", run_id = %self.id, "Run failed: {}", error);
                self.set_status(RunStatus::Error);
                self.error_message = Some(error);
                close_socket = true;
            }
            InboundFrame::InputRequest { input_type, prompt } => {
                let request = InputRequest::from_frame(input_type.as_deref(), prompt);
                self.set_status(RunStatus::AwaitingInput);
                self.input_request = Some(request.clone());
                self.pending_plan = None;
                effects.push(RunEffect::InputRequested(request));
            }
            InboundFrame::Completion { status, data } | InboundFrame::Result { status, data } => {
                let status = RunStatus::from_completion(status.as_deref().unwrap_or_default());
                tracing::info!(target: "runstream::run", run_id = %self.id, status = %status, "Run finished");
                self.set_status(status);
                self.team_result = TeamResult::from_value(&data);
                close_socket = true;
            }
            InboundFrame::Message { data: Some(agent) } => {
                self.ingest(agent, &mut effects);
            }
            InboundFrame::Message { data: None } => {
                tracing::warn!(target: "runstream::run", "Dropping message frame without data");
            }
            InboundFrame::Pong | InboundFrame::Unknown => {}
        }

        if let Some(status) = self.take_status_change() {
            effects.push(RunEffect::StatusChanged(status));
        }
        if close_socket {
            effects.push(RunEffect::CloseSocket);
        }
        effects
    }

    /// Merge or append, inspect, reclassify, then recascade.
    fn ingest(&mut self, agent: AgentMessage, effects: &mut Vec<RunEffect>) {
        let outcome = self.store.append(agent);
        let index = outcome.index();
        effects.push(match outcome {
            MergeOutcome::Appended { index } => RunEffect::Appended { index },
            MergeOutcome::Merged { index } => RunEffect::Merged { index },
        });

        if let Some(message) = self.store.get(index) {
            if self.panel.inspect(message) {
                effects.push(RunEffect::PanelChanged);
            }
        }

        self.classification = classify(self.store.messages());

        if self
            .visibility
            .on_arrival(self.store.messages(), &self.classification.repeated, index)
        {
            effects.push(RunEffect::VisibilityChanged);
        }
    }

    /// Collapse or expand the range after `index`.
    pub fn toggle_visibility(&mut self, index: usize, expand: bool) -> bool {
        self.visibility.toggle_visibility(
            self.store.messages(),
            &self.classification.repeated,
            index,
            expand,
        )
    }

    // ==================== Outbound ====================

    /// Append the user's message and build the start frame for a new task.
    pub fn start_task(
        &mut self,
        query: &str,
        files: Vec<Value>,
        plan: Option<&[PlanStep]>,
        settings: Value,
    ) -> Result<OutboundFrame> {
        let mut effects = Vec::new();
        self.ingest(AgentMessage::user_message(query), &mut effects);
        self.error_message = None;

        let payload = TaskPayload {
            content: query.to_string(),
            plan: plan.map(plan_steps_to_json_string).transpose()?,
        };
        tracing::info!(target: "runstream::run", run_id = %self.id, "Starting task");
        Ok(OutboundFrame::Start {
            id: None,
            task: serde_json::to_string(&payload)?,
            files,
            team_config: self.team_config.clone(),
            settings_config: settings,
            session_id: None,
        })
    }

    /// Free-form user submission: answers a pending request when the run is
    /// waiting on the user, otherwise starts a new task.
    pub fn submit(
        &mut self,
        query: &str,
        files: Vec<Value>,
        accepted: bool,
        plan: Option<&[PlanStep]>,
        settings: Value,
    ) -> Result<OutboundFrame> {
        match self.reported_status() {
            ReportedStatus::Stored(RunStatus::AwaitingInput | RunStatus::Paused)
            | ReportedStatus::FinalAnswerAwaitingInput => self.respond(query, accepted, plan),
            _ => self.start_task(query, files, plan, settings),
        }
    }

    /// Answer an input request.
    ///
    /// Without an explicit plan, pending plan edits are attached when the
    /// message before last is a plan.
    pub fn respond(
        &mut self,
        content: &str,
        accepted: bool,
        plan: Option<&[PlanStep]>,
    ) -> Result<OutboundFrame> {
        let plan = match plan {
            Some(steps) => Some(plan_steps_to_json_string(steps)?),
            None if self.second_to_last_is_plan() => self
                .pending_plan
                .as_deref()
                .map(plan_steps_to_json_string)
                .transpose()?,
            None => None,
        };
        let payload = InputResponsePayload {
            accepted: Some(accepted),
            content: content.to_string(),
            plan,
        };
        let frame = OutboundFrame::InputResponse {
            response: serde_json::to_string(&payload)?,
        };
        self.set_status(RunStatus::Active);
        self.input_request = None;
        Ok(frame)
    }

    fn second_to_last_is_plan(&self) -> bool {
        let messages = self.store.messages();
        messages.len() >= 2 && messages[messages.len() - 2].is_plan()
    }

    pub fn is_awaiting_input(&self) -> bool {
        self.status == RunStatus::AwaitingInput
    }

    pub fn approve(&mut self) -> Result<Option<OutboundFrame>> {
        if !self.is_awaiting_input() {
            return Ok(None);
        }
        self.respond("approve", true, None).map(Some)
    }

    pub fn deny(&mut self) -> Result<Option<OutboundFrame>> {
        if !self.is_awaiting_input() {
            return Ok(None);
        }
        self.respond("deny", false, None).map(Some)
    }

    pub fn accept_plan(&mut self, text: &str) -> Result<Option<OutboundFrame>> {
        if !self.is_awaiting_input() {
            return Ok(None);
        }
        let text = if text.is_empty() { DEFAULT_ACCEPT_TEXT } else { text };
        self.respond(text, true, None).map(Some)
    }

    /// Ask for a new plan, attaching pending edits when the last message is
    /// the plan being replaced.
    pub fn regenerate_plan(&self) -> Result<OutboundFrame> {
        let last_is_plan = self.store.last().is_some_and(Message::is_plan);
        let plan = match (&self.pending_plan, last_is_plan) {
            (Some(steps), true) => Some(plan_steps_to_json_string(steps)?),
            _ => None,
        };
        let payload = InputResponsePayload {
            accepted: None,
            content: REGENERATE_PLAN_PROMPT.to_string(),
            plan,
        };
        Ok(OutboundFrame::InputResponse {
            response: serde_json::to_string(&payload)?,
        })
    }

    /// Record the user's edits to the plan awaiting approval.
    pub fn save_plan_edits(&mut self, steps: Vec<PlanStep>) {
        tracing::debug!(target: "runstream::plan", steps = steps.len(), "Plan edits saved");
        self.pending_plan = Some(steps);
    }

    /// Build a start frame that executes a saved plan.
    pub fn execute_plan(&self, task: &str, steps: Vec<PlanStep>, settings: Value) -> OutboundFrame {
        let saved = SavedPlan::new(task, steps);
        let mut settings = match settings {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        settings.insert(
            "plan".to_string(),
            serde_json::to_value(&saved).unwrap_or(Value::Null),
        );
        tracing::info!(target: "runstream::run", run_id = %self.id, "Executing saved plan");
        OutboundFrame::Start {
            id: Some(format!("plan_{}", chrono::Utc::now().timestamp_millis())),
            task: saved.task,
            files: Vec::new(),
            team_config: self.team_config.clone(),
            settings_config: Value::Object(settings),
            session_id: Some(self.session_id),
        }
    }

    /// Users may not stop or pause while the run waits on them or while the
    /// socket is still connecting.
    pub fn accepts_control(&self) -> bool {
        !self.is_awaiting_input() && !self.status.is_connecting()
    }

    pub fn cancel(&mut self) -> Option<OutboundFrame> {
        if !self.accepts_control() {
            return None;
        }
        self.set_status(RunStatus::Stopped);
        self.input_request = None;
        Some(OutboundFrame::Stop {
            reason: CANCEL_REASON.to_string(),
        })
    }

    pub fn pause(&mut self) -> Option<OutboundFrame> {
        if !self.accepts_control() {
            return None;
        }
        self.set_status(RunStatus::Pausing);
        Some(OutboundFrame::Pause)
    }
}
