//! Awareness session worker.
//!
//! Runs kernel detection and table refreshes for one target in a background
//! thread. The thread owns the target, so reads from different requests can
//! never interleave. Results go out on a broadcast channel that any number
//! of frontends can subscribe to.

use crate::config::Config;
use crate::context::SavedRegister;
use crate::model::TableView;
use crate::provider::{Attachment, DetectionState, NotReady, OsProvider};
use crate::target::TargetAccess;
use crate::Address;
use anyhow::{Context as _, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwarenessCommand {
    /// Run detection now.
    Poll,
    Refresh,
    RefreshTable(String),
    /// Registers saved by the task whose control block is at the address.
    Context(Address),
    /// The symbol set changed; forget the kernel and detect again.
    Reload,
    Exit,
}

#[derive(Debug, Clone)]
pub enum AwarenessEvent {
    Attached { kernel: String },
    NoKernel,
    State { kernel: String, state: DetectionState },
    Tables(Vec<TableView>),
    Context { task: Address, registers: Vec<SavedRegister> },
    NotReady(NotReady),
    Error(String),
}

/// A handle to the awareness worker running in a background thread.
pub struct AwarenessHandle {
    command_tx: Sender<AwarenessCommand>,
    event_tx: tokio::sync::broadcast::Sender<AwarenessEvent>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl AwarenessHandle {
    /// Subscribe to awareness events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AwarenessEvent> {
        self.event_tx.subscribe()
    }

    /// A handle with no worker behind it, plus the worker's ends of both
    /// channels.
    pub fn new_test() -> (Self, Receiver<AwarenessCommand>, tokio::sync::broadcast::Sender<AwarenessEvent>) {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (evt_tx, _) = tokio::sync::broadcast::channel(100);
        (Self { command_tx: cmd_tx, event_tx: evt_tx.clone(), thread_handle: None }, cmd_rx, evt_tx)
    }

    /// Start a worker that owns `target`. Detection waits for the first
    /// command or the first poll interval, so subscribe before sending.
    pub fn spawn(target: Box<dyn TargetAccess + Send>, providers: Vec<Arc<dyn OsProvider>>, config: &Config) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (evt_tx, _) = tokio::sync::broadcast::channel(100);
        let worker = Worker { target, providers, attachment: None, searched: false, events: evt_tx.clone() };
        let interval = config.poll_interval();
        let thread_handle = thread::spawn(move || worker.run(&cmd_rx, interval));
        Self { command_tx: cmd_tx, event_tx: evt_tx, thread_handle: Some(thread_handle) }
    }

    pub fn send(&self, cmd: AwarenessCommand) -> Result<()> {
        self.command_tx.send(cmd).context("Failed to send command")
    }

    /// Stop the worker and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        self.send(AwarenessCommand::Exit)?;
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| anyhow::anyhow!("Awareness worker panicked"))?;
        }
        Ok(())
    }
}

struct Worker {
    target: Box<dyn TargetAccess + Send>,
    providers: Vec<Arc<dyn OsProvider>>,
    attachment: Option<Attachment>,
    /// Detection found nothing; wait for an explicit poll or reload.
    searched: bool,
    events: tokio::sync::broadcast::Sender<AwarenessEvent>,
}

impl Worker {
    fn run(mut self, commands: &Receiver<AwarenessCommand>, interval: Duration) {
        log::debug!("Awareness worker started, polling every {interval:?}");
        loop {
            match commands.recv_timeout(interval) {
                Ok(AwarenessCommand::Exit) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => self.poll(false),
            }
        }
        log::debug!("Awareness worker stopped");
    }

    fn emit(&self, event: AwarenessEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn handle(&mut self, cmd: AwarenessCommand) {
        log::trace!("Awareness command {cmd:?}");
        match cmd {
            AwarenessCommand::Poll => self.poll(true),
            AwarenessCommand::Refresh => match &self.attachment {
                None => self.emit(AwarenessEvent::NoKernel),
                Some(attachment) => match attachment.refresh(self.target.as_mut()) {
                    Ok(views) => self.emit(AwarenessEvent::Tables(views)),
                    Err(not_ready) => self.emit(AwarenessEvent::NotReady(not_ready)),
                },
            },
            AwarenessCommand::RefreshTable(id) => match &self.attachment {
                None => self.emit(AwarenessEvent::NoKernel),
                Some(attachment) => match attachment.refresh_table(&id, self.target.as_mut()) {
                    Ok(Some(view)) => self.emit(AwarenessEvent::Tables(vec![view])),
                    Ok(None) => self.emit(AwarenessEvent::Error(format!("{} has no table `{id}`", attachment.kernel()))),
                    Err(not_ready) => self.emit(AwarenessEvent::NotReady(not_ready)),
                },
            },
            AwarenessCommand::Context(task) => match &self.attachment {
                None => self.emit(AwarenessEvent::NoKernel),
                Some(attachment) => match attachment.context(self.target.as_mut(), task) {
                    Some(Ok(registers)) => self.emit(AwarenessEvent::Context { task, registers }),
                    Some(Err(fault)) => self.emit(AwarenessEvent::Error(format!("Context of task {task}: {fault}"))),
                    None => self.emit(AwarenessEvent::Error(format!(
                        "{} does not expose task context",
                        attachment.kernel()
                    ))),
                },
            },
            AwarenessCommand::Reload => {
                self.attachment = None;
                self.searched = false;
                self.poll(true);
            }
            AwarenessCommand::Exit => {}
        }
    }

    fn poll(&mut self, explicit: bool) {
        let events = &self.events;
        let target = self.target.as_mut();
        match &mut self.attachment {
            Some(attachment) => {
                let before = attachment.state();
                let state = attachment.poll(target);
                if state != before || explicit {
                    let _ = events.send(AwarenessEvent::State { kernel: attachment.kernel().to_string(), state });
                }
            }
            None if self.searched && !explicit => {}
            None => match Attachment::detect(&self.providers, target) {
                Some(attachment) => {
                    let kernel = attachment.kernel().to_string();
                    let _ = events.send(AwarenessEvent::Attached { kernel: kernel.clone() });
                    let _ = events.send(AwarenessEvent::State { kernel, state: attachment.state() });
                    self.attachment = Some(attachment);
                }
                None => {
                    if !self.searched {
                        log::info!("No supported kernel found");
                    }
                    self.searched = true;
                    let _ = events.send(AwarenessEvent::NoKernel);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryImage;
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, TypeRegistry};

    #[tokio::test]
    async fn test_handle_send_receive() {
        let (handle, cmd_rx, event_tx) = AwarenessHandle::new_test();

        handle.send(AwarenessCommand::RefreshTable("tasks".to_string())).unwrap();
        let cmd = cmd_rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(cmd, AwarenessCommand::RefreshTable("tasks".to_string()));

        let mut receiver = handle.subscribe();
        event_tx.send(AwarenessEvent::NoKernel).unwrap();
        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, AwarenessEvent::NoKernel));
    }

    #[tokio::test]
    async fn test_worker_without_kernel() {
        let target = LayoutTarget::new(SymbolTable::new(), TypeRegistry::new(), MemoryImage::new());
        let config = Config { poll_interval_ms: 60_000, ..Config::default() };
        let handle = AwarenessHandle::spawn(Box::new(target), Vec::new(), &config);
        let mut events = handle.subscribe();

        handle.send(AwarenessCommand::Refresh).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, AwarenessEvent::NoKernel));

        handle.send(AwarenessCommand::Poll).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, AwarenessEvent::NoKernel));

        handle.shutdown().unwrap();
    }
}
