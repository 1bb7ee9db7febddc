//! Fleet-wide coordination: broadcasts the discovery probe, demultiplexes
//! replies by serial number, owns the controller set, and fans lifecycle
//! events out to registered listeners.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::controller::{Controller, ControllerCallbacks, DisconnectCause};
use crate::datagram::{self, FireplaceDatagram, SendToken};
use crate::error::EsceaError;
use crate::message::{Command, FireplaceMessage};

/// External observer of the controller fleet. Every method defaults to a
/// no-op, so an implementer only needs to override the events it cares
/// about.
pub trait Listener: Send + Sync {
    fn controller_discovered(&self, _controller: Arc<Controller>) {}
    fn controller_disconnected(&self, _controller: Arc<Controller>, _cause: DisconnectCause) {}
    fn controller_reconnected(&self, _controller: Arc<Controller>) {}
    fn controller_update(&self, _controller: Arc<Controller>) {}
}

struct ListenerEntry {
    id: u64,
    listener: Arc<dyn Listener>,
}

pub struct DiscoveryService {
    config: Config,
    broadcast_addr: IpAddr,
    send_token: SendToken,
    controllers: Arc<DashMap<String, Arc<Controller>>>,
    disconnected: Arc<DashSet<String>>,
    listeners: std::sync::RwLock<Vec<ListenerEntry>>,
    next_listener_id: std::sync::atomic::AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl DiscoveryService {
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_broadcast_addr(
            config,
            crate::config::DEFAULT_BROADCAST_ADDR.parse().unwrap(),
        )
    }

    pub fn with_broadcast_addr(config: Config, broadcast_addr: IpAddr) -> Arc<Self> {
        Arc::new(Self {
            config,
            broadcast_addr,
            send_token: datagram::new_send_token(),
            controllers: Arc::new(DashMap::new()),
            disconnected: Arc::new(DashSet::new()),
            listeners: std::sync::RwLock::new(Vec::new()),
            next_listener_id: std::sync::atomic::AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Performs one broadcast probe synchronously, then spawns the
    /// background scan loop. Returns once the first wave of replies (which
    /// may be empty) has been processed.
    pub async fn start_discovery(self: &Arc<Self>) -> Result<(), EsceaError> {
        self.scan_once().await?;

        let this = self.clone();
        let handle = tokio::spawn(async move { this.scan_loop().await });
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    async fn scan_once(self: &Arc<Self>) -> Result<(), EsceaError> {
        let datagram = FireplaceDatagram::new(
            self.broadcast_addr,
            self.config.port,
            true,
            self.config.request_timeout,
            self.send_token.clone(),
        );
        let responses = datagram.send_command(Command::SearchForFires).await?;
        for (addr, msg) in responses {
            self.discovery_received(msg, addr).await;
        }
        Ok(())
    }

    async fn scan_loop(self: Arc<Self>) {
        loop {
            if let Err(e) = self.scan_once().await {
                warn!("discovery broadcast failed: {}", e);
            }

            let sleep_for = if self.disconnected.is_empty() {
                self.config.discovery_sleep
            } else {
                self.config.discovery_rescan
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn discovery_received(self: &Arc<Self>, msg: FireplaceMessage, source_addr: IpAddr) {
        let serial_number = match msg {
            FireplaceMessage::IAmAFire { serial_number } => serial_number,
            _ => return,
        };

        if let Some(existing) = self.controllers.get(&serial_number) {
            existing.refresh_address(source_addr).await;
            return;
        }

        let this = self.clone();
        let serial_for_task = serial_number.clone();
        let config = self.config.clone();
        let send_token = self.send_token.clone();
        let handle = tokio::spawn(async move {
            let callbacks: std::sync::Weak<dyn ControllerCallbacks> = Arc::downgrade(&this);
            match Controller::initialize(
                serial_for_task.clone(),
                source_addr,
                config,
                send_token,
                callbacks,
            )
            .await
            {
                Ok(controller) => {
                    let controller = Arc::new(controller);
                    this.controllers.insert(serial_for_task.clone(), controller.clone());
                    info!("discovered controller {}", serial_for_task);
                    this.notify_discovered(controller.clone()).await;

                    let poll_controller = controller.clone();
                    poll_controller.run().await;
                }
                Err(e) => {
                    warn!("failed to initialize controller {}: {}", serial_for_task, e);
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn notify_discovered(&self, controller: Arc<Controller>) {
        let listeners = self.listeners.read().unwrap();
        for entry in listeners.iter() {
            call_with_isolation(|| entry.listener.controller_discovered(controller.clone()));
        }
    }

    /// Registers a listener and immediately (before returning) replays
    /// `controller_discovered` for every controller known at this instant.
    /// This is a strictly stronger ordering guarantee than "eventually
    /// replayed": no later event for this listener can be observed before
    /// the replay completes.
    pub async fn add_listener(&self, listener: Arc<dyn Listener>) -> u64 {
        let id = self
            .next_listener_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let snapshot: Vec<Arc<Controller>> =
            self.controllers.iter().map(|e| e.value().clone()).collect();
        for controller in snapshot {
            call_with_isolation(|| listener.controller_discovered(controller.clone()));
        }

        self.listeners.write().unwrap().push(ListenerEntry { id, listener });
        id
    }

    pub async fn remove_listener(&self, id: u64) {
        self.listeners.write().unwrap().retain(|e| e.id != id);
    }

    pub fn controller(&self, serial_number: &str) -> Option<Arc<Controller>> {
        self.controllers.get(serial_number).map(|e| e.value().clone())
    }

    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        self.controllers.iter().map(|e| e.value().clone()).collect()
    }

    /// Stops the scan loop and every controller poll loop, then waits for
    /// all of them to exit. No sockets survive close.
    pub async fn close(&self) {
        self.cancel.cancel();
        for controller in self.controllers.iter() {
            controller.value().request_close();
        }

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("discovery task panicked: {}", e);
            }
        }
    }
}

impl ControllerCallbacks for DiscoveryService {
    fn controller_disconnected(&self, serial_number: &str, cause: DisconnectCause) {
        self.disconnected.insert(serial_number.to_string());
        let Some(controller) = self.controller(serial_number) else {
            return;
        };
        let listeners = self.listeners.read().unwrap();
        for entry in listeners.iter() {
            call_with_isolation(|| entry.listener.controller_disconnected(controller.clone(), cause));
        }
    }

    fn controller_reconnected(&self, serial_number: &str) {
        self.disconnected.remove(serial_number);
        let Some(controller) = self.controller(serial_number) else {
            return;
        };
        let listeners = self.listeners.read().unwrap();
        for entry in listeners.iter() {
            call_with_isolation(|| entry.listener.controller_reconnected(controller.clone()));
        }
    }

    fn controller_update(&self, serial_number: &str) {
        let Some(controller) = self.controller(serial_number) else {
            return;
        };
        let listeners = self.listeners.read().unwrap();
        for entry in listeners.iter() {
            call_with_isolation(|| entry.listener.controller_update(controller.clone()));
        }
    }
}

/// Runs a single listener callback, catching a panic so one broken listener
/// cannot stop the fan-out to the rest.
fn call_with_isolation<F: FnOnce()>(f: F) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("listener panicked");
        error!("listener callback panicked: {}", msg);
    }
}
