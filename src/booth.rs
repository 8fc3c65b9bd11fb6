// The orchestration thread. Owns the session machine and its timers; the web
// side only sends commands and reads snapshots.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc as async_mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::errors::{AppError, AppResult};
use crate::session::{BoothSnapshot, SessionEvent, SessionMachine, ShotCount};
use crate::timer::RepeatingTimer;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Reply channel for commands whose outcome the caller wants to report.
pub type Reply = oneshot::Sender<AppResult<()>>;

#[derive(Debug)]
pub enum BoothCommand {
    Start(ShotCount, Option<Reply>),
    Discard(Option<Reply>),
    Print(Option<Reply>),
    Reprint(Option<Reply>),
    Shutdown,
}

/// Cloneable handle for the web layer.
#[derive(Clone)]
pub struct BoothHandle {
    commands: mpsc::Sender<BoothCommand>,
    snapshots: watch::Receiver<BoothSnapshot>,
}

impl BoothHandle {
    pub fn snapshot(&self) -> BoothSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BoothSnapshot> {
        self.snapshots.clone()
    }

    pub fn send(&self, command: BoothCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::Web("Booth is not running".to_string()))
    }

    /// Send a command and wait for the machine's verdict on it.
    pub async fn request(&self, make: impl FnOnce(Option<Reply>) -> BoothCommand) -> AppResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(make(Some(tx)))?;
        rx.await
            .map_err(|_| AppError::Web("Booth stopped before replying".to_string()))?
    }
}

/// Running orchestrator thread.
pub struct Booth {
    handle: BoothHandle,
    thread: Option<JoinHandle<()>>,
}

impl Booth {
    pub fn spawn(
        machine: SessionMachine,
        events: async_mpsc::UnboundedSender<SessionEvent>,
    ) -> AppResult<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        let thread = std::thread::Builder::new()
            .name("booth".to_string())
            .spawn(move || {
                Orchestrator::new(machine, snapshot_tx, events).run(command_rx);
            })
            .map_err(|e| AppError::Initialization(format!("Failed to start booth thread: {}", e)))?;

        Ok(Self {
            handle: BoothHandle {
                commands: command_tx,
                snapshots: snapshot_rx,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> BoothHandle {
        self.handle.clone()
    }

    /// Stop timers, close the camera and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.commands.send(BoothCommand::Shutdown);
            if thread.join().is_err() {
                error!("Booth thread panicked");
            }
            info!("Booth stopped");
        }
    }
}

impl Drop for Booth {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Orchestrator {
    machine: SessionMachine,
    countdown: RepeatingTimer,
    preview: Option<RepeatingTimer>,
    snapshots: watch::Sender<BoothSnapshot>,
    events: async_mpsc::UnboundedSender<SessionEvent>,
}

impl Orchestrator {
    fn new(
        machine: SessionMachine,
        snapshots: watch::Sender<BoothSnapshot>,
        events: async_mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let preview = machine
            .preview_interval()
            .filter(|interval| !interval.is_zero())
            .map(RepeatingTimer::new);
        Self {
            machine,
            countdown: RepeatingTimer::new(COUNTDOWN_TICK),
            preview,
            snapshots,
            events,
        }
    }

    fn run(mut self, commands: mpsc::Receiver<BoothCommand>) {
        info!("Booth ready");
        if let Some(timer) = self.preview.as_mut() {
            timer.start(Instant::now());
        }

        loop {
            match commands.recv_timeout(self.next_wait(Instant::now())) {
                Ok(BoothCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.fire_timers(Instant::now());
        }

        self.countdown.stop();
        if let Some(timer) = self.preview.as_mut() {
            timer.stop();
        }
        self.machine.shutdown();
        self.publish();
    }

    fn next_wait(&self, now: Instant) -> Duration {
        [
            self.countdown.time_until_due(now),
            self.preview.as_ref().and_then(|t| t.time_until_due(now)),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(IDLE_WAIT)
    }

    fn handle_command(&mut self, command: BoothCommand) {
        debug!("Booth command: {:?}", command);
        let (result, reply) = match command {
            BoothCommand::Start(shots, reply) => (self.machine.start_session(shots), reply),
            BoothCommand::Discard(reply) => (self.machine.discard(), reply),
            BoothCommand::Print(reply) => {
                self.publish_status("Printing...");
                (self.machine.print(), reply)
            }
            BoothCommand::Reprint(reply) => (self.machine.reprint(), reply),
            BoothCommand::Shutdown => return,
        };

        if let Err(e) = &result {
            warn!("Booth command refused: {}", e);
        }
        self.after_change();
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        if self.countdown.poll(now) {
            self.machine.tick();
            self.after_change();
        }
        if self.preview.as_mut().is_some_and(|t| t.poll(now)) {
            self.machine.poll_preview();
        }
    }

    /// Run transient steps to completion, keep the countdown timer in step
    /// with the machine, and publish.
    fn after_change(&mut self) {
        self.publish();
        let mut stepped = false;
        while self.machine.has_pending_step() {
            self.machine.advance();
            self.publish();
            stepped = true;
        }

        // A capture may block for a while; each countdown gets a fresh phase
        if self.machine.wants_ticks() {
            if stepped || !self.countdown.is_running() {
                self.countdown.start(Instant::now());
            }
        } else {
            self.countdown.stop();
        }

        for event in self.machine.drain_events() {
            if self.events.send(event).is_err() {
                debug!("History writer is gone, dropping event");
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.machine.snapshot());
    }

    fn publish_status(&self, status: &str) {
        let mut snapshot = self.machine.snapshot();
        snapshot.status = Some(status.to_string());
        snapshot.controls_enabled = false;
        self.snapshots.send_replace(snapshot);
    }
}
