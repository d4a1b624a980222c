//! Event reactor shared by both roles
//!
//! One task per session drains the transport's event channel and feeds the
//! role machine. Machine, channel and deadline sit behind a single mutex so
//! external calls (`send_answer`, `disconnect`) serialize with event
//! handling. Callbacks run on the reactor task after the mutex is released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::Timeouts;
use crate::transport::{Connection, Connector, TransportEvent};

use super::channel::SignalingChannel;
use super::event::{InboundEvent, OutboundEvent};
use super::types::{Awaiting, SignalingError, UnexpectedEvent};

/// Step produced by a role machine, executed in order by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<S> {
    Emit(OutboundEvent),
    Disconnect,
    Signal(S),
    Fail(SignalingError),
}

/// A role's protocol state machine. Pure: it never touches the transport.
pub trait Role: Send + 'static {
    type Signal: Send + 'static;
    type Phase: Clone + fmt::Debug + Send;

    /// Idle -> Connecting.
    fn begin(&mut self);

    fn on_connected(&mut self) -> Vec<Action<Self::Signal>>;

    fn handle(&mut self, event: InboundEvent) -> Result<Vec<Action<Self::Signal>>, UnexpectedEvent>;

    /// Enter the failed state unless already terminal.
    fn fail(&mut self, error: SignalingError) -> Vec<Action<Self::Signal>>;

    /// Local disconnect. Enters `Closed` unless already terminal.
    fn close(&mut self);

    fn awaiting(&self) -> Option<Awaiting>;

    /// `Some` once the phase is terminal.
    fn outcome(&self) -> Option<Result<(), SignalingError>>;

    fn phase(&self) -> Self::Phase;
}

/// Receives a role's completion signals. Runs on the reactor task.
pub trait Notifier<S>: Send + 'static {
    fn signal(&mut self, signal: S);

    fn error(&mut self, error: SignalingError);
}

enum Notice<S> {
    Signal(S),
    Error(SignalingError),
}

struct Inner<R: Role> {
    role: R,
    channel: SignalingChannel,
    timeouts: Timeouts,
    deadline: Option<(Awaiting, Instant)>,
    /// Notices from external calls, delivered by the reactor task.
    deferred: Vec<Notice<R::Signal>>,
}

impl<R: Role> Inner<R> {
    fn apply(&mut self, actions: Vec<Action<R::Signal>>) -> Vec<Notice<R::Signal>> {
        let mut notices = Vec::new();
        let mut pending: VecDeque<_> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                Action::Emit(event) => {
                    debug!("emit {}", event.name());
                    if let Err(e) = self.channel.emit(&event) {
                        warn!("Failed to emit {}: {}", event.name(), e);
                        // The rest of the batch assumed the emit went out.
                        pending.clear();
                        let error = SignalingError::from(e);
                        let follow = self.role.fail(error.clone());
                        if follow.is_empty() {
                            pending.push_back(Action::Disconnect);
                            notices.push(Notice::Error(error));
                        }
                        pending.extend(follow);
                    }
                }
                Action::Disconnect => {
                    if self.channel.disconnect() {
                        info!("Signaling connection closed");
                    }
                }
                Action::Signal(signal) => notices.push(Notice::Signal(signal)),
                Action::Fail(error) => notices.push(Notice::Error(error)),
            }
        }

        self.refresh_deadline();
        notices
    }

    fn refresh_deadline(&mut self) {
        let awaiting = if self.channel.is_closed() {
            None
        } else {
            self.role.awaiting()
        };

        match (awaiting, self.deadline) {
            (Some(now_awaiting), Some((current, _))) if now_awaiting == current => {}
            (Some(now_awaiting), _) => {
                self.deadline = self
                    .timeouts
                    .for_phase(now_awaiting)
                    .map(|limit| (now_awaiting, Instant::now() + limit));
            }
            (None, _) => self.deadline = None,
        }
    }
}

struct Shared<R: Role> {
    inner: Mutex<Inner<R>>,
    wake: Notify,
    done: watch::Sender<Option<Result<(), SignalingError>>>,
}

impl<R: Role> Shared<R> {
    fn settle(&self, inner: &Inner<R>) {
        if let Some(outcome) = inner.role.outcome() {
            self.done.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = Some(outcome);
                    true
                } else {
                    false
                }
            });
        }
    }

    fn dispatch(&self, event: Option<TransportEvent>) -> Vec<Notice<R::Signal>> {
        let mut inner = self.inner.lock();
        if inner.channel.is_closed() {
            return Vec::new();
        }

        let actions = match event {
            Some(TransportEvent::Connected) => {
                info!("Connected to relay");
                inner.channel.mark_connected();
                inner.role.on_connected()
            }
            Some(TransportEvent::Message { name, args }) => match InboundEvent::decode(&name, &args) {
                Ok(Some(event)) => {
                    debug!("received {}", name);
                    match inner.role.handle(event) {
                        Ok(actions) => actions,
                        Err(unexpected) => {
                            warn!("Ignoring {}", unexpected);
                            Vec::new()
                        }
                    }
                }
                Ok(None) => {
                    debug!("Ignoring unknown event {}", name);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Malformed {} payload: {}", name, e);
                    inner.role.fail(e.into())
                }
            },
            Some(TransportEvent::Disconnected(reason)) => inner
                .role
                .fail(SignalingError::Transport(format!("connection lost: {}", reason))),
            Some(TransportEvent::Error(message)) => inner.role.fail(SignalingError::Transport(message)),
            None => inner
                .role
                .fail(SignalingError::Transport("transport stopped".to_string())),
        };

        let notices = inner.apply(actions);
        self.settle(&inner);
        notices
    }

    fn expire(&self, expected: (Awaiting, Instant)) -> Vec<Notice<R::Signal>> {
        let mut inner = self.inner.lock();
        if inner.channel.is_closed() || inner.deadline != Some(expected) {
            return Vec::new();
        }

        let (awaiting, _) = expected;
        warn!("Timed out {}", awaiting);
        let actions = inner.role.fail(SignalingError::TimedOut(awaiting));
        let notices = inner.apply(actions);
        self.settle(&inner);
        notices
    }
}

/// A running role session.
pub(crate) struct Session<R: Role> {
    shared: Arc<Shared<R>>,
}

impl<R: Role> Clone for Session<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Role> Session<R> {
    pub(crate) fn spawn<N: Notifier<R::Signal>>(
        mut role: R,
        connection: Connection,
        timeouts: Timeouts,
        notifier: N,
    ) -> Self {
        role.begin();
        let Connection { transport, events } = connection;

        let mut inner = Inner {
            role,
            channel: SignalingChannel::new(transport),
            timeouts,
            deadline: None,
            deferred: Vec::new(),
        };
        inner.refresh_deadline();

        let (done, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            inner: Mutex::new(inner),
            wake: Notify::new(),
            done,
        });

        tokio::spawn(run(Arc::clone(&shared), events, notifier));
        Self { shared }
    }

    pub(crate) fn phase(&self) -> R::Phase {
        self.shared.inner.lock().role.phase()
    }

    pub(crate) fn inspect<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.shared.inner.lock().role)
    }

    /// Run an externally triggered transition. A rejected call changes
    /// nothing. A failure the transition causes is returned to the caller
    /// and also reaches the error callback.
    pub(crate) fn apply_external(
        &self,
        f: impl FnOnce(&mut R) -> Result<Vec<Action<R::Signal>>, SignalingError>,
    ) -> Result<(), SignalingError> {
        let mut inner = self.shared.inner.lock();
        let actions = f(&mut inner.role)?;
        let notices = inner.apply(actions);
        self.shared.settle(&inner);

        let failure = notices.iter().find_map(|notice| match notice {
            Notice::Error(e) => Some(e.clone()),
            Notice::Signal(_) => None,
        });
        inner.deferred.extend(notices);
        drop(inner);
        self.shared.wake.notify_one();

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.channel.disconnect() {
            info!("Signaling session disconnected");
            inner.role.close();
            inner.deadline = None;
        }
        self.shared.settle(&inner);
        drop(inner);
        self.shared.wake.notify_one();
    }

    pub(crate) async fn finished(&self) -> Result<(), SignalingError> {
        let mut rx = self.shared.done.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(SignalingError::Closed))
    }
}

/// Open the connection, bounded by the connect timeout if one is set.
pub(crate) async fn open(
    connector: &dyn Connector,
    server_addr: &str,
    timeouts: &Timeouts,
) -> Result<Connection, SignalingError> {
    let connecting = connector.connect(server_addr);
    let connection = match timeouts.for_phase(Awaiting::Connection) {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| SignalingError::TimedOut(Awaiting::Connection))??,
        None => connecting.await?,
    };
    Ok(connection)
}

async fn run<R: Role, N: Notifier<R::Signal>>(
    shared: Arc<Shared<R>>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
    mut notifier: N,
) {
    loop {
        let (deferred, closed, deadline) = {
            let mut inner = shared.inner.lock();
            let deferred = std::mem::take(&mut inner.deferred);
            (deferred, inner.channel.is_closed(), inner.deadline)
        };
        notify(&mut notifier, deferred);
        if closed {
            break;
        }

        let notices = tokio::select! {
            event = events.recv() => shared.dispatch(event),
            _ = sleep_until(deadline) => match deadline {
                Some(expected) => shared.expire(expected),
                None => Vec::new(),
            },
            _ = shared.wake.notified() => Vec::new(),
        };

        notify(&mut notifier, notices);
    }
    debug!("Session reactor stopped");
}

fn notify<S, N: Notifier<S>>(notifier: &mut N, notices: Vec<Notice<S>>) {
    for notice in notices {
        match notice {
            Notice::Signal(signal) => notifier.signal(signal),
            Notice::Error(error) => notifier.error(error),
        }
    }
}

async fn sleep_until(deadline: Option<(Awaiting, Instant)>) {
    match deadline {
        Some((_, at)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
