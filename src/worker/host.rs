//! The execution environment around a worker: lifecycle states and a single
//! dispatch loop fed by a channel.
//!
//! Install and activate are handled inline by the loop, so anything queued
//! behind an activation waits for it to finish. Each fetch runs in its own
//! task.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::cache::CacheResult;
use crate::net::{Fetcher, Request, Response};

use super::{InstallEvent, WorkerHandler};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Registered handler, install not dispatched yet
  Parsed,
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activating,
  /// Intercepting fetches
  Activated,
  /// Install or activation failed; fetches are no longer intercepted
  Redundant,
}

type FetchReply = oneshot::Sender<Result<CacheResult<Response>>>;

enum HostEvent {
  Install(oneshot::Sender<Result<WorkerState>>),
  Activate(oneshot::Sender<Result<()>>),
  Fetch(Request, FetchReply),
}

/// Cloneable handle for dispatching events to a running host.
#[derive(Clone)]
pub struct HostHandle {
  tx: mpsc::UnboundedSender<HostEvent>,
  state: watch::Receiver<WorkerState>,
}

impl HostHandle {
  /// Start a host for a freshly registered worker.
  pub fn spawn<H, F>(handler: Arc<H>, network: Arc<F>) -> Self
  where
    H: WorkerHandler,
    F: Fetcher + 'static,
  {
    Self::start(handler, network, WorkerState::Parsed)
  }

  /// Start a host whose worker was already activated earlier.
  pub fn resume<H, F>(handler: Arc<H>, network: Arc<F>) -> Self
  where
    H: WorkerHandler,
    F: Fetcher + 'static,
  {
    Self::start(handler, network, WorkerState::Activated)
  }

  fn start<H, F>(handler: Arc<H>, network: Arc<F>, initial: WorkerState) -> Self
  where
    H: WorkerHandler,
    F: Fetcher + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(initial);

    let host = Host {
      handler,
      network,
      state: state_tx,
    };
    tokio::spawn(host.run(rx));

    Self {
      tx,
      state: state_rx,
    }
  }

  /// Dispatch install. If the handler skips waiting, activation follows
  /// immediately and this resolves once it is done.
  pub async fn register(&self) -> Result<WorkerState> {
    self.send(HostEvent::Install).await?
  }

  /// Activate a worker left waiting after install.
  pub async fn activate(&self) -> Result<()> {
    self.send(HostEvent::Activate).await?
  }

  /// Dispatch a fetch. An error is a failed load.
  ///
  /// Dropping the returned future abandons the request.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    self
      .send(|reply| HostEvent::Fetch(request, reply))
      .await?
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  async fn send<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> HostEvent) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(event(reply))
      .map_err(|_| eyre!("Worker host has shut down"))?;

    rx.await
      .map_err(|_| eyre!("Worker host dropped the event"))
  }
}

struct Host<H, F> {
  handler: Arc<H>,
  network: Arc<F>,
  state: watch::Sender<WorkerState>,
}

impl<H, F> Host<H, F>
where
  H: WorkerHandler,
  F: Fetcher + 'static,
{
  async fn run(self, mut rx: mpsc::UnboundedReceiver<HostEvent>) {
    while let Some(event) = rx.recv().await {
      match event {
        HostEvent::Install(reply) => {
          let _ = reply.send(self.install().await);
        }
        HostEvent::Activate(reply) => {
          let _ = reply.send(self.activate().await);
        }
        HostEvent::Fetch(request, reply) => self.dispatch_fetch(request, reply),
      }
    }

    debug!("worker host stopped");
  }

  fn current(&self) -> WorkerState {
    *self.state.borrow()
  }

  fn set_state(&self, state: WorkerState) {
    info!(?state, "worker state changed");
    self.state.send_replace(state);
  }

  async fn install(&self) -> Result<WorkerState> {
    self.set_state(WorkerState::Installing);

    let mut event = InstallEvent::default();
    self.handler.on_install(&mut event);
    self.set_state(WorkerState::Installed);

    if event.skips_waiting() {
      self.activate().await?;
    }

    Ok(self.current())
  }

  async fn activate(&self) -> Result<()> {
    let state = self.current();
    if state != WorkerState::Installed {
      return Err(eyre!("Cannot activate a worker in state {:?}", state));
    }

    self.set_state(WorkerState::Activating);
    match self.handler.on_activate().await {
      Ok(()) => {
        self.set_state(WorkerState::Activated);
        Ok(())
      }
      Err(err) => {
        warn!(error = %err, "activation failed");
        self.set_state(WorkerState::Redundant);
        Err(err.wrap_err("Worker activation failed"))
      }
    }
  }

  fn dispatch_fetch(&self, request: Request, mut reply: FetchReply) {
    // Clients are only controlled by an active worker; everyone else hits the network
    let controlled = self.current() == WorkerState::Activated;
    let handler = Arc::clone(&self.handler);
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      let url = request.url.clone();
      let work = async {
        if !controlled {
          return network.fetch(&request).await.map(CacheResult::from_network);
        }

        handler
          .on_fetch(request)
          .await?
          .ok_or_else(|| eyre!("Failed to load {}: network unavailable and nothing cached", url))
      };

      tokio::select! {
        _ = reply.closed() => {
          debug!(%url, "fetch abandoned by caller");
        }
        result = work => {
          let _ = reply.send(result);
        }
      }
    });
  }
}
