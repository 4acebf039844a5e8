//! Profiling session state machine.
//!
//! `Idle -> Running -> Ready | Failed`, back to `Idle` on stop or teardown. Every run carries a
//! [`RunId`]; process events for any run other than the one currently `Running` are dropped.

use serde::Serialize;

use std::sync::Arc;

use crate::{
    Config, DocumentEvent, DocumentSync, Launcher, ProcessEvent, ProfileError, ProfileErrorKind,
    RunHandle, RunId, RunRequest, StatsModel, Surface,
};

#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Running { run: RunId, handle: RunHandle },
    Ready { run: RunId, model: Arc<StatsModel> },
    Failed { error: ProfileError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Ready,
    Failed,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle => SessionStatus::Idle,
            Self::Running { .. } => SessionStatus::Running,
            Self::Ready { .. } => SessionStatus::Ready,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Toggle,
    Process(ProcessEvent),
    Document(DocumentEvent),
    Teardown,
}

#[derive(Debug)]
pub struct SessionController<L: Launcher> {
    config: Config,
    launcher: L,
    state: SessionState,
    last_run: RunId,
    sync: DocumentSync,
}

impl<L: Launcher> SessionController<L> {
    pub fn new(config: Config, launcher: L) -> Self {
        Self {
            config,
            launcher,
            state: SessionState::Idle,
            last_run: RunId(0),
            sync: DocumentSync::new(),
        }
    }

    /// Start tracking the host's documents.
    pub fn activate<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        self.sync.attach(surface);
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn model(&self) -> Option<&StatsModel> {
        match &self.state {
            SessionState::Ready { model, .. } => Some(model.as_ref()),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&ProfileError> {
        match &self.state {
            SessionState::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Takes effect on the next run.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn handle_event<S: Surface + ?Sized>(&mut self, surface: &mut S, event: SessionEvent) {
        match event {
            SessionEvent::Toggle => self.toggle(surface),
            SessionEvent::Teardown => self.teardown(surface),
            SessionEvent::Document(DocumentEvent::Opened(doc)) => {
                let model = match &self.state {
                    SessionState::Ready { model, .. } => Some(Arc::clone(model)),
                    _ => None,
                };
                self.sync.on_document_opened(surface, doc, model.as_deref());
            }
            SessionEvent::Document(DocumentEvent::Closed(doc)) => self.sync.on_document_closed(doc),
            SessionEvent::Process(ProcessEvent::Warning { run, message }) => {
                if self.is_current(run) {
                    surface.warn(&message);
                } else {
                    tracing::debug!("{run}: dropping stale stderr");
                }
            }
            SessionEvent::Process(ProcessEvent::Finished { run, outcome }) => {
                self.on_process_result(surface, run, outcome);
            }
        }
    }

    /// Start a run from `Idle`/`Failed`; stop from `Running`/`Ready`.
    pub fn toggle<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        match self.state {
            SessionState::Idle | SessionState::Failed { .. } => self.start(surface),
            SessionState::Running { .. } | SessionState::Ready { .. } => self.stop(surface),
        }
    }

    fn start<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        let Some(doc) = surface.active_document() else {
            return self.on_active_document_missing(
                surface,
                ProfileError::new(ProfileErrorKind::NoActiveDocument, "no active document to profile"),
            );
        };
        let Some(path) = surface.document_path(doc) else {
            return self.on_active_document_missing(
                surface,
                ProfileError::new(
                    ProfileErrorKind::NoActiveDocument,
                    "active document has no file on disk",
                ),
            );
        };
        if !self.config.is_profilable(&path) {
            return self.on_active_document_missing(
                surface,
                ProfileError::new(
                    ProfileErrorKind::UnsupportedFileType,
                    format!(
                        "cannot profile this file type: {path} (expected *{})",
                        self.config.source_extension
                    ),
                ),
            );
        }

        let run = self.last_run.next();
        self.last_run = run;
        let request = RunRequest {
            target: path,
            color_mode: self.config.color_selection,
            format: self.config.profile_format.clone(),
            timeout: self.config.timeout(),
        };
        tracing::info!("{run}: profiling {}", request.target);
        match self.launcher.launch(run, request) {
            Ok(handle) => self.state = SessionState::Running { run, handle },
            Err(error) => self.fail(surface, error, true),
        }
    }

    fn stop<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        if let SessionState::Running { run, handle } = &self.state {
            tracing::info!("{run}: stopped while running");
            handle.cancel();
        }
        self.state = SessionState::Idle;
        self.sync.apply_to_all(surface, None);
    }

    /// Nothing profilable is active: warn and settle in `Idle` without spawning.
    pub fn on_active_document_missing<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        error: ProfileError,
    ) {
        tracing::warn!("not profiling: {error}");
        surface.warn(&error.message);
        self.state = SessionState::Idle;
    }

    pub fn on_process_result<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        run: RunId,
        outcome: Result<StatsModel, ProfileError>,
    ) {
        if !self.is_current(run) {
            tracing::debug!("{run}: discarding result of superseded run");
            return;
        }
        match outcome {
            Ok(model) => {
                tracing::info!(
                    "{run}: ready with {} files, {} lines",
                    model.files().len(),
                    model.line_count()
                );
                let model = Arc::new(model);
                self.state = SessionState::Ready {
                    run,
                    model: Arc::clone(&model),
                };
                self.sync.apply_to_all(surface, Some(model.as_ref()));
            }
            Err(error) if error.kind == ProfileErrorKind::Cancelled => {
                self.state = SessionState::Idle;
                self.sync.apply_to_all(surface, None);
            }
            Err(error) => {
                // stderr text was already shown when it arrived
                let notify = error.kind != ProfileErrorKind::ProcessStderrOutput;
                self.fail(surface, error, notify);
            }
        }
    }

    /// Host shutdown: clear everything, stop observing, return to `Idle`.
    pub fn teardown<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        if let SessionState::Running { handle, .. } = &self.state {
            handle.cancel();
        }
        self.state = SessionState::Idle;
        self.sync.detach(surface);
        tracing::info!("session torn down");
    }

    fn fail<S: Surface + ?Sized>(&mut self, surface: &mut S, error: ProfileError, notify: bool) {
        tracing::warn!("profiling failed: {error}");
        if notify {
            surface.warn(&error.message);
        }
        self.state = SessionState::Failed { error };
        self.sync.apply_to_all(surface, None);
    }

    fn is_current(&self, run: RunId) -> bool {
        matches!(&self.state, SessionState::Running { run: current, .. } if *current == run)
    }
}
