//! Turn controller: the single owner of assistant state.
//!
//! Capture frames, recognizer events, synthesis events, dispatch outcomes,
//! timers and host commands are all consumed by one `select!` loop, so every
//! state transition happens on one logical thread of control. Adapters never
//! call into the controller; they only deliver events.
//!
//! ```text
//! Idle ──start──▶ Listening ──speech start──▶ CapturingSpeech
//!                    ▲                              │ speech end
//!                    │ cool-down            AwaitingTranscript
//!                    │                              │ grace / final
//!                 Speaking ◀──reply── Dispatching ◀─┘
//! ```

use crate::audio::CaptureSource;
use crate::config::AssistantConfig;
use crate::dialogue::{DialogueBackend, DialogueClient, DispatchOutcome, HistoryEntry};
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use crate::runtime::{AssistantState, RuntimeEvent};
use crate::stt::{RecognizerEvent, SpeechRecognizer, TranscriptionAdapter};
use crate::tts::{SpeechOutputController, SpeechSynthesizer, SynthesisEvent};
use crate::vad::{SpeechProbability, VadEngine, VadTransition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FRAME_CHANNEL_SIZE: usize = 64;

/// Host commands accepted by a running controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnCommand {
    StartListening,
    StopListening,
    /// Cancel playback without starting a new turn.
    Interrupt,
    /// Typed input: treated as a final transcript for a new turn.
    Say(String),
    Shutdown,
}

/// The external collaborators a controller drives.
pub struct TurnAdapters {
    pub capture: Box<dyn CaptureSource>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub recognizer_events: mpsc::UnboundedReceiver<RecognizerEvent>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub synthesis_events: mpsc::UnboundedReceiver<SynthesisEvent>,
    pub backend: Arc<dyn DialogueBackend>,
}

/// Cloneable handle for sending commands to, and observing, a controller.
#[derive(Clone)]
pub struct TurnHandle {
    commands: mpsc::UnboundedSender<TurnCommand>,
    state: watch::Receiver<AssistantState>,
    history: watch::Receiver<Vec<HistoryEntry>>,
    cancel: CancellationToken,
}

impl TurnHandle {
    pub fn start_listening(&self) -> Result<()> {
        self.send(TurnCommand::StartListening)
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.send(TurnCommand::StopListening)
    }

    pub fn interrupt(&self) -> Result<()> {
        self.send(TurnCommand::Interrupt)
    }

    pub fn say(&self, text: impl Into<String>) -> Result<()> {
        self.send(TurnCommand::Say(text.into()))
    }

    /// Ask the controller to release its adapters and exit `run`.
    pub fn shutdown(&self) {
        if self.send(TurnCommand::Shutdown).is_err() {
            self.cancel.cancel();
        }
    }

    /// Current state as last published by the controller.
    pub fn state(&self) -> AssistantState {
        *self.state.borrow()
    }

    /// Wait until the controller reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Channel`] if the controller exits first.
    pub async fn wait_for_state(&self, target: AssistantState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SpeechError::Channel("turn controller has stopped".into()))
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<AssistantState> {
        self.state.clone()
    }

    /// Conversation history of the voice session, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.borrow().clone()
    }

    fn send(&self, command: TurnCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SpeechError::Channel("turn controller has stopped".into()))
    }
}

/// A dispatch result tagged with the turn generation it was started under.
struct DispatchDone {
    generation: u64,
    outcome: DispatchOutcome,
}

struct Inbox {
    frames: mpsc::Receiver<AudioFrame>,
    recognizer: mpsc::UnboundedReceiver<RecognizerEvent>,
    synthesis: mpsc::UnboundedReceiver<SynthesisEvent>,
    dispatch: mpsc::UnboundedReceiver<DispatchDone>,
    commands: mpsc::UnboundedReceiver<TurnCommand>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timers {
    /// End of the post-speech grace window.
    grace: Option<Instant>,
    /// When capture re-arms after a cool-down.
    rearm: Option<Instant>,
    /// When to retry starting the recognizer.
    recognizer_restart: Option<Instant>,
}

/// Orchestrates VAD, transcription, dialogue and speech output.
pub struct TurnController {
    config: AssistantConfig,
    state: AssistantState,
    vad: VadEngine,
    transcription: TranscriptionAdapter,
    dialogue: DialogueClient,
    speech: SpeechOutputController,
    capture: Box<dyn CaptureSource>,
    frame_tx: mpsc::Sender<AudioFrame>,
    dispatch_tx: mpsc::UnboundedSender<DispatchDone>,
    command_tx: mpsc::UnboundedSender<TurnCommand>,
    state_tx: watch::Sender<AssistantState>,
    history_tx: watch::Sender<Vec<HistoryEntry>>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    cancel: CancellationToken,
    inbox: Option<Inbox>,
    listening: bool,
    vad_armed: bool,
    /// Advanced whenever the current turn is abandoned; replies started
    /// under an older value are dropped.
    turn_generation: u64,
    /// A transcript waiting for the superseded dispatch to finish.
    queued_transcript: Option<String>,
    timers: Timers,
}

impl TurnController {
    /// Build a controller in the `Idle` state.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] if the configuration is invalid.
    pub fn new(config: AssistantConfig, adapters: TurnAdapters) -> Result<Self> {
        config.validate()?;

        let (frame_tx, frames) = mpsc::channel(FRAME_CHANNEL_SIZE);
        let (dispatch_tx, dispatch) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(AssistantState::Idle);
        let (history_tx, _) = watch::channel(Vec::new());

        Ok(Self {
            vad: VadEngine::new(&config.vad),
            transcription: TranscriptionAdapter::new(adapters.recognizer, &config.stt),
            dialogue: DialogueClient::new(adapters.backend, &config.dialogue, &config.tts.locale),
            speech: SpeechOutputController::new(adapters.synthesizer, &config.tts),
            capture: adapters.capture,
            frame_tx,
            dispatch_tx,
            command_tx,
            state_tx,
            history_tx,
            runtime_tx: None,
            cancel: CancellationToken::new(),
            inbox: Some(Inbox {
                frames,
                recognizer: adapters.recognizer_events,
                synthesis: adapters.synthesis_events,
                dispatch,
                commands,
            }),
            state: AssistantState::Idle,
            listening: false,
            vad_armed: false,
            turn_generation: 0,
            queued_transcript: None,
            timers: Timers::default(),
            config,
        })
    }

    /// Attach a runtime event broadcaster for presentation layers.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Replace the VAD's speech probability model.
    pub fn with_vad_model(mut self, model: Box<dyn SpeechProbability>) -> Self {
        self.vad = VadEngine::with_model(&self.config.vad, model);
        self
    }

    pub fn handle(&self) -> TurnHandle {
        TurnHandle {
            commands: self.command_tx.clone(),
            state: self.state_tx.subscribe(),
            history: self.history_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> AssistantState {
        self.state
    }

    /// Cancellation token that stops `run` from outside.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shut down. Adapters are released on exit.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Channel`] if called on a controller whose
    /// inbox was already consumed.
    pub async fn run(mut self) -> Result<()> {
        let Some(mut inbox) = self.inbox.take() else {
            return Err(SpeechError::Channel("turn controller already ran".into()));
        };
        let cancel = self.cancel.clone();
        info!(session = %self.config.turn.session_id, "turn controller running");

        loop {
            let Timers {
                grace,
                rearm,
                recognizer_restart,
            } = self.timers;

            tokio::select! {
                () = cancel.cancelled() => break,
                command = inbox.commands.recv() => {
                    match command {
                        Some(TurnCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(frame) = inbox.frames.recv() => self.handle_frame(&frame),
                Some(event) = inbox.recognizer.recv() => self.handle_recognizer_event(event),
                Some(event) = inbox.synthesis.recv() => self.handle_synthesis_event(event),
                Some(done) = inbox.dispatch.recv() => self.handle_dispatch_done(done),
                () = deadline(grace) => {
                    self.timers.grace = None;
                    self.finish_transcript();
                }
                () = deadline(rearm) => self.rearm_capture(),
                () = deadline(recognizer_restart) => self.restart_recognizer(),
            }
        }

        self.stop_listening();
        info!("turn controller stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: TurnCommand) {
        debug!(?command, "turn command");
        match command {
            TurnCommand::StartListening => self.start_listening().await,
            TurnCommand::StopListening => self.stop_listening(),
            TurnCommand::Interrupt => self.interrupt(),
            TurnCommand::Say(text) => self.inject_text(&text),
            TurnCommand::Shutdown => {}
        }
    }

    // ── capture lifecycle ───────────────────────────────────────────

    async fn start_listening(&mut self) {
        if self.listening {
            warn!("start_listening ignored: already listening");
            return;
        }
        if let Err(e) = self.capture.start(self.frame_tx.clone()).await {
            self.fail(e);
            return;
        }
        self.listening = true;
        self.vad.reset();
        self.vad_armed = true;
        info!("capture armed");

        if self.state == AssistantState::Idle {
            if !self.ensure_recognizer() {
                return;
            }
            self.set_state(AssistantState::Listening);
        }
    }

    fn stop_listening(&mut self) {
        self.capture.stop();
        self.transcription.stop();
        self.vad.reset();
        self.listening = false;
        self.vad_armed = false;
        self.timers = Timers::default();
        self.cancel_playback();
        self.abandon_turn();
        self.set_state(AssistantState::Idle);
    }

    /// Report a fatal error and stop listening. Never retried.
    fn fail(&mut self, err: SpeechError) {
        error!("{err}");
        self.emit(RuntimeEvent::Error(err.to_string()));
        self.stop_listening();
    }

    /// Go back to `Listening` with capture disarmed for `cooldown`.
    fn return_to_listening(&mut self, cooldown: Duration) {
        if !self.listening {
            self.set_state(AssistantState::Idle);
            return;
        }
        self.vad_armed = false;
        self.vad.reset();
        self.timers.rearm = Some(Instant::now() + cooldown);
        self.set_state(AssistantState::Listening);
    }

    fn rearm_capture(&mut self) {
        self.timers.rearm = None;
        if !self.listening || self.state != AssistantState::Listening {
            return;
        }
        self.vad.reset();
        self.vad_armed = true;
        if self.ensure_recognizer() {
            debug!("capture re-armed");
        }
    }

    // ── VAD ─────────────────────────────────────────────────────────

    fn handle_frame(&mut self, frame: &AudioFrame) {
        if !self.listening || !self.vad_armed {
            return;
        }
        let out = self.vad.feed(frame);
        self.emit(RuntimeEvent::Vad(out.update));
        match out.transition {
            Some(VadTransition::SpeechStart { .. }) => self.on_speech_start(),
            Some(VadTransition::SpeechEnd { .. }) => self.on_speech_end(),
            None => {}
        }
    }

    fn on_speech_start(&mut self) {
        match self.state {
            AssistantState::Listening => self.begin_capture(),
            AssistantState::Speaking if self.config.turn.barge_in => {
                self.cancel_playback();
                self.begin_capture();
            }
            AssistantState::Speaking => debug!("speech during playback ignored"),
            AssistantState::Dispatching => {
                info!("user spoke again, dropping pending reply");
                self.abandon_turn();
                self.begin_capture();
            }
            AssistantState::AwaitingTranscript => {
                self.timers.grace = None;
                self.transcription.resume_segment();
                self.set_state(AssistantState::CapturingSpeech);
            }
            AssistantState::Idle | AssistantState::CapturingSpeech => {}
        }
    }

    fn begin_capture(&mut self) {
        self.transcription.open_segment();
        if self.ensure_recognizer() {
            self.set_state(AssistantState::CapturingSpeech);
        }
    }

    fn on_speech_end(&mut self) {
        if self.state != AssistantState::CapturingSpeech {
            return;
        }
        let now = Instant::now();
        let grace = self.config.turn.grace_window();
        self.transcription.close_segment(now, grace);
        self.timers.grace = Some(now + grace);
        self.set_state(AssistantState::AwaitingTranscript);
    }

    // ── transcription ───────────────────────────────────────────────

    fn handle_recognizer_event(&mut self, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Fragment(fragment) => {
                let Some(fragment) = self.transcription.accept(fragment, Instant::now()) else {
                    return;
                };
                self.emit(RuntimeEvent::Transcript {
                    text: fragment.text.clone(),
                    is_final: fragment.is_final,
                });
                if fragment.is_final && self.state == AssistantState::AwaitingTranscript {
                    self.timers.grace = None;
                    self.finish_transcript();
                }
            }
            RecognizerEvent::Error {
                message,
                permission,
            } => {
                self.transcription.mark_stopped();
                match self
                    .transcription
                    .restart_delay_after_error(permission, &message)
                {
                    Some(delay) => self.schedule_recognizer_restart(delay),
                    None => self.fail(SpeechError::Permission(message)),
                }
            }
            RecognizerEvent::Ended => {
                self.transcription.mark_stopped();
                let delay = self.transcription.restart_delay_after_end();
                self.schedule_recognizer_restart(delay);
            }
        }
    }

    /// Start the recognizer if needed. Returns `false` after a fatal error.
    fn ensure_recognizer(&mut self) -> bool {
        match self.transcription.start() {
            Ok(()) => true,
            Err(e) if e.is_permission() => {
                self.fail(e);
                false
            }
            Err(e) => {
                warn!("recognizer failed to start: {e}");
                let backoff = Duration::from_millis(self.config.stt.restart_backoff_ms);
                self.schedule_recognizer_restart(backoff);
                true
            }
        }
    }

    fn schedule_recognizer_restart(&mut self, delay: Duration) {
        if self.listening
            && !matches!(
                self.state,
                AssistantState::Idle | AssistantState::Speaking
            )
        {
            self.timers.recognizer_restart = Some(Instant::now() + delay);
        }
    }

    fn restart_recognizer(&mut self) {
        self.timers.recognizer_restart = None;
        if !self.listening
            || matches!(
                self.state,
                AssistantState::Idle | AssistantState::Speaking
            )
        {
            return;
        }
        debug!("restarting recognizer");
        self.ensure_recognizer();
    }

    fn finish_transcript(&mut self) {
        if self.state != AssistantState::AwaitingTranscript {
            return;
        }
        let text = self.transcription.take_transcript();
        if text.is_empty() {
            info!("no transcript for this turn");
            self.return_to_listening(self.config.turn.cooldown());
            return;
        }
        self.dispatch(text);
    }

    // ── dialogue ────────────────────────────────────────────────────

    fn dispatch(&mut self, text: String) {
        let timeout = self.config.dialogue.timeout();
        match self
            .dialogue
            .begin(&self.config.turn.session_id, &text, timeout)
        {
            Ok(pending) => {
                let generation = self.turn_generation;
                let tx = self.dispatch_tx.clone();
                tokio::spawn(async move {
                    let outcome = pending.run().await;
                    let _ = tx.send(DispatchDone {
                        generation,
                        outcome,
                    });
                });
                self.set_state(AssistantState::Dispatching);
            }
            Err(SpeechError::Busy { session_id }) => {
                info!(session = %session_id, "previous reply still in flight, queueing transcript");
                self.queued_transcript = Some(text);
                self.set_state(AssistantState::Dispatching);
            }
            Err(e) => {
                error!("dispatch failed: {e}");
                self.emit(RuntimeEvent::Error(e.to_string()));
                self.return_to_listening(self.config.turn.cooldown());
            }
        }
    }

    fn handle_dispatch_done(&mut self, done: DispatchDone) {
        let exchange = self.dialogue.complete(done.outcome);
        self.history_tx
            .send_replace(self.dialogue.history(&self.config.turn.session_id));

        if done.generation != self.turn_generation {
            debug!(
                generation = done.generation,
                current = self.turn_generation,
                "discarding reply for superseded turn"
            );
            if let Some(text) = self.queued_transcript.take() {
                self.dispatch(text);
            }
            return;
        }
        if self.state != AssistantState::Dispatching {
            debug!(state = ?self.state, "reply arrived outside dispatch, ignoring");
            return;
        }

        if let Some(reason) = exchange.degraded {
            self.emit(RuntimeEvent::Degraded { reason });
        }
        let text = exchange.response.text.clone();
        self.emit(RuntimeEvent::Response(exchange.response));
        self.start_speaking(&text);
    }

    /// Drop whatever the current turn was waiting for.
    fn abandon_turn(&mut self) {
        self.turn_generation += 1;
        self.queued_transcript = None;
    }

    // ── speech output ───────────────────────────────────────────────

    fn start_speaking(&mut self, text: &str) {
        self.transcription.stop();
        match self.speech.speak(text) {
            Ok(generation) => {
                debug!(generation, "playback started");
                self.set_state(AssistantState::Speaking);
                self.emit(RuntimeEvent::SpeakingStart);
            }
            Err(e) => {
                warn!("speech output failed: {e}");
                self.return_to_listening(self.config.turn.speaking_cooldown());
            }
        }
    }

    fn handle_synthesis_event(&mut self, event: SynthesisEvent) {
        let Some(completion) = self.speech.on_event(event) else {
            return;
        };
        if let Some(err) = &completion.error {
            warn!(generation = completion.generation, "playback ended with error: {err}");
        }
        self.emit(RuntimeEvent::SpeakingEnd);
        if self.state == AssistantState::Speaking {
            self.return_to_listening(self.config.turn.speaking_cooldown());
        }
    }

    /// Cancel the active utterance, if any.
    fn cancel_playback(&mut self) -> bool {
        match self.speech.cancel() {
            Some(generation) => {
                info!(generation, "playback interrupted");
                self.emit(RuntimeEvent::Interrupted { generation });
                true
            }
            None => false,
        }
    }

    fn interrupt(&mut self) {
        if self.cancel_playback() && self.state == AssistantState::Speaking {
            self.return_to_listening(self.config.turn.speaking_cooldown());
        }
    }

    fn inject_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.cancel_playback();
        self.abandon_turn();
        self.timers.grace = None;
        // Typed turns bypass the cool-down; the VAD stays armed.
        self.timers.rearm = None;
        self.vad.reset();
        self.vad_armed = self.listening;
        let _ = self.transcription.take_transcript();
        self.emit(RuntimeEvent::Transcript {
            text: text.to_owned(),
            is_final: true,
        });
        self.dispatch(text.to_owned());
    }

    // ── events ──────────────────────────────────────────────────────

    fn set_state(&mut self, next: AssistantState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "turn state");
        self.state = next;
        self.state_tx.send_replace(next);
        self.emit(RuntimeEvent::StatusChange {
            state: next,
            message: next.status_message().to_owned(),
        });
        self.emit(RuntimeEvent::Emotion(next.emotion()));
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
