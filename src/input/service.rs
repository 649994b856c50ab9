//! Async control loop owning the [`HotkeyEngine`].
//!
//! Callers talk to the loop through a cloneable [`HotkeyHandle`]. The loop
//! multiplexes handle commands, keyboard hook events, Globe helper signals and
//! the capture finalize timer; each input is handled to completion before the
//! next is taken.

use std::future;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::capture::{CaptureError, CaptureResult, PendingCapture};
use super::globe::GlobeListener;
use super::hotkey::{
    EngineError, EngineEvents, HotkeyEngine, RecordingController, RecordingSnapshot,
    RecordingStatus,
};
use super::keys::KeyCombo;
use super::source::KeyEventSource;

/// Errors surfaced through [`HotkeyHandle`]
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service loop has stopped
    #[error("hotkey service is not running")]
    Closed,
    /// Registration failed
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Capture ended without a result
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

enum Command {
    Register {
        combo: KeyCombo,
        controller: Box<dyn RecordingController>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RegisterAccelerator {
        accelerator: String,
        controller: Box<dyn RecordingController>,
        reply: oneshot::Sender<Result<KeyCombo, EngineError>>,
    },
    Rebind {
        combo: KeyCombo,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Unregister {
        reply: oneshot::Sender<()>,
    },
    StartCapture {
        reply: oneshot::Sender<PendingCapture>,
    },
    StopCapture {
        reply: oneshot::Sender<bool>,
    },
    MarkIdle,
    Snapshot {
        reply: oneshot::Sender<RecordingSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front end of a running [`HotkeyService`]
#[derive(Clone)]
pub struct HotkeyHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RecordingStatus>,
}

impl HotkeyHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ServiceError::Closed)?;
        rx.await.map_err(|_| ServiceError::Closed)
    }

    /// Arm `combo`, routing start/stop signals to `controller`
    ///
    /// # Errors
    /// [`ServiceError::Engine`] if the keyboard hook cannot start,
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn register(
        &self,
        combo: KeyCombo,
        controller: Box<dyn RecordingController>,
    ) -> Result<(), ServiceError> {
        self.request(|reply| Command::Register {
            combo,
            controller,
            reply,
        })
        .await??;
        Ok(())
    }

    /// Parse and arm an accelerator; returns the combination actually armed
    ///
    /// # Errors
    /// [`ServiceError::Engine`] if the keyboard hook cannot start,
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn register_accelerator(
        &self,
        accelerator: &str,
        controller: Box<dyn RecordingController>,
    ) -> Result<KeyCombo, ServiceError> {
        let accelerator = accelerator.to_owned();
        Ok(self
            .request(|reply| Command::RegisterAccelerator {
                accelerator,
                controller,
                reply,
            })
            .await??)
    }

    /// Arm a new combination with the current controller
    ///
    /// # Errors
    /// [`ServiceError::Engine`] if the keyboard hook cannot start,
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn rebind(&self, combo: KeyCombo) -> Result<(), ServiceError> {
        self.request(|reply| Command::Rebind { combo, reply })
            .await??;
        Ok(())
    }

    /// Disarm the hotkey
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn unregister(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::Unregister { reply }).await
    }

    /// Begin a capture session; await the returned future for the result
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn start_capture(&self) -> Result<PendingCapture, ServiceError> {
        self.request(|reply| Command::StartCapture { reply }).await
    }

    /// Run a full capture session and wait for its result
    ///
    /// # Errors
    /// [`ServiceError::Capture`] if the session was cancelled or superseded,
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn capture(&self) -> Result<CaptureResult, ServiceError> {
        Ok(self.start_capture().await?.await?)
    }

    /// Cancel the capture in progress; returns false if there was none
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn stop_capture(&self) -> Result<bool, ServiceError> {
        self.request(|reply| Command::StopCapture { reply }).await
    }

    /// Tell the engine the downstream pipeline is done with the last recording
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service has stopped.
    pub fn mark_idle(&self) -> Result<(), ServiceError> {
        self.commands
            .send(Command::MarkIdle)
            .map_err(|_| ServiceError::Closed)
    }

    /// Current engine state
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service has stopped.
    pub async fn snapshot(&self) -> Result<RecordingSnapshot, ServiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Receiver for recording status updates
    #[must_use]
    pub fn status(&self) -> watch::Receiver<RecordingStatus> {
        self.status.clone()
    }

    /// Stop the service and tear down the engine
    ///
    /// # Errors
    /// [`ServiceError::Closed`] if the service had already stopped.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Control loop that owns the engine
pub struct HotkeyService<S: KeyEventSource, G: GlobeListener> {
    engine: HotkeyEngine<S, G>,
    events: EngineEvents,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<S, G> HotkeyService<S, G>
where
    S: KeyEventSource + 'static,
    G: GlobeListener + 'static,
{
    /// Wrap an engine and its event receivers
    pub fn new(engine: HotkeyEngine<S, G>, events: EngineEvents) -> (Self, HotkeyHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = HotkeyHandle {
            commands: tx,
            status: engine.subscribe(),
        };
        (
            Self {
                engine,
                events,
                commands,
            },
            handle,
        )
    }

    /// Run the loop on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until `shutdown` is requested or every handle is dropped
    pub async fn run(mut self) {
        info!("hotkey service started");

        loop {
            let deadline = self.engine.capture_deadline();

            // Queued key events win over an expired capture deadline
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            self.engine.shutdown();
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle(command),
                        None => {
                            debug!("all hotkey handles dropped");
                            break;
                        }
                    }
                }
                Some(event) = self.events.hook.recv() => {
                    self.engine.handle_hook_event(event);
                }
                Some(signal) = self.events.globe.recv() => {
                    self.engine.handle_globe_signal(signal);
                }
                () = capture_timer(deadline) => {
                    if let Some((generation, _)) = deadline {
                        self.engine.capture_timer_fired(generation);
                    }
                }
            }
        }

        self.engine.shutdown();
        info!("hotkey service stopped");
    }

    fn handle(&mut self, command: Command) {
        // Replies fail only if the caller stopped waiting
        match command {
            Command::Register {
                combo,
                controller,
                reply,
            } => {
                let _ = reply.send(self.engine.register(combo, controller));
            }
            Command::RegisterAccelerator {
                accelerator,
                controller,
                reply,
            } => {
                let _ = reply.send(self.engine.register_accelerator(&accelerator, controller));
            }
            Command::Rebind { combo, reply } => {
                let _ = reply.send(self.engine.rebind(combo));
            }
            Command::Unregister { reply } => {
                self.engine.unregister();
                let _ = reply.send(());
            }
            Command::StartCapture { reply } => {
                let _ = reply.send(self.engine.start_capture());
            }
            Command::StopCapture { reply } => {
                let _ = reply.send(self.engine.stop_capture());
            }
            Command::MarkIdle => self.engine.mark_idle(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Shutdown { reply } => {
                self.engine.shutdown();
                let _ = reply.send(());
            }
        }
    }
}

async fn capture_timer(deadline: Option<(u64, Instant)>) {
    match deadline {
        Some((_, at)) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}
