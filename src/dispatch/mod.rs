//! Command dispatcher and session state machine.
//!
//! ```text
//!            begin(B)                      stop | end
//!   Idle ─────────────► Analyzing(M, B) ─────────────► Idle
//!                          │      ▲
//!                          └──────┘ trReport, result
//! ```
//!
//! The dispatcher is not thread-safe by construction: it is owned by a single
//! consumer that feeds it envelopes in arrival order. Every per-envelope
//! problem ends in exactly one `Message` status and leaves the session as it
//! was.

pub mod observer;
pub mod session;

use tokio::sync::watch;

use crate::error::EnvelopeError;
use crate::protocol::{Action, Command, CprSummary, Envelope, EnvelopeData, TrajectorySummary};
use crate::transport::LinkEvent;

pub use observer::{Notification, Observer, ObserverList, StatusCategory};
pub use session::{AnalysisMode, Session};

/// Routes envelopes into the session and notifies observers.
#[derive(Debug)]
pub struct Dispatcher {
    session: Session,
    observers: ObserverList,
    snapshot: watch::Sender<Session>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an idle dispatcher with no observers.
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Session::default());
        Self {
            session: Session::default(),
            observers: ObserverList::default(),
            snapshot,
        }
    }

    /// Register an observer.
    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.add(observer);
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Receiver that always holds the latest session snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.snapshot.subscribe()
    }

    /// Route one transport event.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => self.observers.connection_state(state),
            LinkEvent::Envelope(text) => self.handle(&text),
            LinkEvent::Fault(err) => {
                self.observers.status(&err.to_string(), StatusCategory::Message);
            }
        }
    }

    /// Process one complete envelope line.
    pub fn handle(&mut self, text: &str) {
        if let Err(err) = self.route(text) {
            log::warn!("[Dispatch] {err}");
            self.observers.status(&err.to_string(), StatusCategory::Message);
        }
    }

    fn route(&mut self, text: &str) -> Result<(), EnvelopeError> {
        let envelope = Envelope::parse(text)?;
        log::debug!("[Dispatch] {} ({})", envelope.cmd, envelope.action_name());

        let command = Command::parse(&envelope.cmd)
            .ok_or_else(|| EnvelopeError::UnknownCommand(envelope.cmd.clone()))?;
        let Some(mode) = AnalysisMode::for_command(command) else {
            self.config_ack(&envelope);
            return Ok(());
        };

        if !envelope.is_success() {
            let text = format!(
                "{mode} analysis failed (code {}, action {}): {}",
                envelope.code.unwrap_or_default(),
                envelope.action_name(),
                envelope.msg.as_deref().unwrap_or(""),
            );
            log::warn!("[Dispatch] {text}");
            self.observers.status(&text, StatusCategory::Message);
            return Ok(());
        }

        let data = envelope.data()?;
        let action = Action::parse(&data.action).ok_or_else(|| EnvelopeError::UnknownAction {
            cmd: envelope.cmd.clone(),
            action: data.action.clone(),
        })?;

        match action {
            Action::Begin => self.begin(mode, data),
            Action::Stop | Action::End => self.stop(mode),
            Action::TrReport => log::debug!("[Dispatch] {mode} tracker report acknowledged"),
            Action::Result => self.result(mode, &envelope, data)?,
        }
        Ok(())
    }

    fn config_ack(&mut self, envelope: &Envelope) {
        let text = if envelope.is_success() {
            "Configuration applied".to_string()
        } else {
            format!("Configuration failed: {}", envelope.msg.as_deref().unwrap_or(""))
        };
        log::info!("[Dispatch] {text}");
        self.observers.status(&text, StatusCategory::Message);
    }

    fn begin(&mut self, mode: AnalysisMode, data: EnvelopeData) {
        let biz_id = data.biz_id.unwrap_or_default();
        if self.session.analyzing {
            log::info!(
                "[Dispatch] {} analysis {} replaced by {mode}",
                self.session.mode,
                self.session.biz_id
            );
        }
        let text = format!("{mode} analysis started (bizId={biz_id})");
        self.session.begin(mode, biz_id);
        self.publish();

        log::info!("[Dispatch] {text}");
        self.observers.status(&text, StatusCategory::Message);
        self.observers.analysis(true);
    }

    fn stop(&mut self, mode: AnalysisMode) {
        if self.session.analyzing && self.session.mode != mode {
            let text = format!(
                "Ignoring {mode} stop: {} analysis is active",
                self.session.mode
            );
            log::warn!("[Dispatch] {text}");
            self.observers.status(&text, StatusCategory::Message);
            return;
        }

        let was_analyzing = self.session.stop();
        if was_analyzing {
            self.publish();
        }

        let text = format!("{mode} analysis stopped");
        log::info!("[Dispatch] {text}");
        self.observers.status(&text, StatusCategory::Message);
        if was_analyzing {
            self.observers.analysis(false);
        }
    }

    fn result(
        &mut self,
        mode: AnalysisMode,
        envelope: &Envelope,
        data: EnvelopeData,
    ) -> Result<(), EnvelopeError> {
        if !data.is_finish {
            self.observers
                .status(&format!("{mode} analysis incomplete"), StatusCategory::AnalysisResult);
            return Ok(());
        }

        let missing = || EnvelopeError::MissingDataField {
            cmd: envelope.cmd.clone(),
            action: data.action.clone(),
        };
        let summary = data.summary.as_ref().ok_or_else(missing)?;
        let text = match mode {
            AnalysisMode::Cpr => CprSummary::from_value(summary).ok_or_else(missing)?.render(),
            _ => TrajectorySummary::from_value(summary)
                .ok_or_else(missing)?
                .render(mode.label()),
        };
        log::info!("[Dispatch] {}", text.replace('\n', "; "));
        self.observers.status(&text, StatusCategory::AnalysisResult);
        Ok(())
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.clone());
    }
}
