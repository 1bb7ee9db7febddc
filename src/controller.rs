//! One physical fireplace and the client-side state machine that tracks it.

use std::net::IpAddr;
use std::sync::Weak;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::datagram::{FireplaceDatagram, SendToken};
use crate::error::EsceaError;
use crate::message::{Command, FireplaceMessage, StatusPayload};

/// Derived from the device's mutually-exclusive `fan_boost_is_on` /
/// `flame_effect` booleans; never observed with both booleans true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Auto,
    FanBoost,
    FlameEffect,
}

impl FanMode {
    fn from_booleans(fan_boost_is_on: bool, flame_effect: bool) -> Self {
        if fan_boost_is_on {
            FanMode::FanBoost
        } else if flame_effect {
            FanMode::FlameEffect
        } else {
            FanMode::Auto
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Ready,
    Busy,
    NonResponsive,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    Timeout,
}

/// The client's view of one fireplace: the live (authoritative/desired) model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSettings {
    pub fire_is_on: bool,
    pub fan_mode: FanMode,
    pub desired_temp: u8,
    pub current_temp: u8,
    pub has_new_timers: bool,
}

/// Non-owning callback sink a [`Controller`] reports lifecycle events to.
///
/// A [`crate::discovery::DiscoveryService`] implements this and hands
/// controllers a [`Weak`] reference to itself, avoiding a reference cycle
/// (Discovery owns Controllers by `Arc`).
pub trait ControllerCallbacks: Send + Sync {
    fn controller_disconnected(&self, serial_number: &str, cause: DisconnectCause);
    fn controller_reconnected(&self, serial_number: &str);
    fn controller_update(&self, serial_number: &str);
}

struct Inner {
    ip_address: IpAddr,
    state: ControllerState,
    live: SystemSettings,
    prior_snapshot: SystemSettings,
    last_response: Instant,
    last_update: Instant,
    busy_end_time: Instant,
    /// Wall-clock time of the last valid STATUS reply, exposed to callers
    /// that want a timestamp rather than a monotonic instant.
    last_seen: chrono::DateTime<chrono::Utc>,
}

/// One fireplace and its poll loop.
///
/// `serial_number` is immutable once constructed; `ip_address` may change
/// across rediscovery via [`Controller::refresh_address`].
pub struct Controller {
    serial_number: String,
    config: Config,
    send_token: SendToken,
    inner: Mutex<Inner>,
    callbacks: Weak<dyn ControllerCallbacks>,
    wake: Notify,
    cancel: CancellationToken,
}

impl Controller {
    /// Builds a controller and performs the one synchronous status fetch
    /// required to enter the fleet. Returns `Err` if that fetch fails;
    /// callers (Discovery) should decline to register the controller.
    pub async fn initialize(
        serial_number: String,
        ip_address: IpAddr,
        config: Config,
        send_token: SendToken,
        callbacks: Weak<dyn ControllerCallbacks>,
    ) -> Result<Self, EsceaError> {
        let datagram = FireplaceDatagram::new(
            ip_address,
            config.port,
            false,
            config.request_timeout,
            send_token.clone(),
        );
        let responses = datagram.send_command(Command::StatusPlease).await?;
        let status = responses
            .get(&ip_address)
            .and_then(as_status)
            .ok_or(EsceaError::NoControllersResponded)?;

        let now = Instant::now();
        let live = settings_from_status(status);
        let controller = Self {
            serial_number,
            config,
            send_token,
            inner: Mutex::new(Inner {
                ip_address,
                state: ControllerState::Ready,
                live,
                prior_snapshot: live,
                last_response: now,
                last_update: now,
                busy_end_time: now,
                last_seen: chrono::Utc::now(),
            }),
            callbacks,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        };
        Ok(controller)
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub async fn device_ip(&self) -> IpAddr {
        self.inner.lock().await.ip_address
    }

    /// Wall-clock time of the last valid STATUS reply.
    pub async fn last_seen(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.lock().await.last_seen
    }

    pub async fn state(&self) -> ControllerState {
        self.inner.lock().await.state
    }

    pub async fn settings(&self) -> SystemSettings {
        self.inner.lock().await.live
    }

    pub fn min_temp(&self) -> u8 {
        self.config.min_set_temp
    }

    pub fn max_temp(&self) -> u8 {
        self.config.max_set_temp
    }

    /// Cancels the poll loop. Any in-flight exchange completes or times out
    /// normally; this only stops the next sleep/poll cycle from starting.
    pub fn request_close(&self) {
        self.cancel.cancel();
    }

    /// Rediscovery at a new source address: update the IP and wake the poll
    /// loop so its next request targets the new address immediately.
    pub async fn refresh_address(&self, new_addr: IpAddr) {
        let mut inner = self.inner.lock().await;
        if inner.ip_address != new_addr {
            info!("{}: address changed to {}", self.serial_number, new_addr);
            inner.ip_address = new_addr;
        }
        drop(inner);
        self.wake.notify_one();
    }

    /// Runs until `request_close` is called. Intended to be spawned as its
    /// own task by the owner (Discovery) immediately after construction.
    pub async fn run(&self) {
        loop {
            self.refresh().await;

            let sleep_for = {
                let inner = self.inner.lock().await;
                match inner.state {
                    ControllerState::Ready => self.config.refresh_interval,
                    ControllerState::NonResponsive => self.config.retry_interval,
                    ControllerState::Disconnected => self.config.disconnected_interval,
                    ControllerState::Busy => {
                        inner.busy_end_time.saturating_duration_since(Instant::now())
                    }
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("{}: poll loop exiting", self.serial_number);
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    fn datagram(&self, ip_address: IpAddr) -> FireplaceDatagram {
        FireplaceDatagram::new(
            ip_address,
            self.config.port,
            false,
            self.config.request_timeout,
            self.send_token.clone(),
        )
    }

    async fn request_status(&self, ip_address: IpAddr) -> Option<StatusPayload> {
        match self.datagram(ip_address).send_command(Command::StatusPlease).await {
            Ok(responses) => responses.get(&ip_address).and_then(as_status).copied(),
            Err(e) => {
                warn!("{}: status request failed: {}", self.serial_number, e);
                None
            }
        }
    }

    /// One refresh cycle: polls the device, advances the state machine, and
    /// reconciles buffered client intent back into the device when returning
    /// to READY from anything other than READY.
    async fn refresh(&self) {
        let mut inner = self.inner.lock().await;

        if inner.state == ControllerState::Busy && Instant::now() < inner.busy_end_time {
            return;
        }

        let prior_state = inner.state;
        let ip_address = inner.ip_address;
        drop(inner);

        let status = self.request_status(ip_address).await;

        let mut inner = self.inner.lock().await;
        match status {
            Some(status) => {
                inner.state = ControllerState::Ready;
                inner.last_response = Instant::now();
                inner.last_seen = chrono::Utc::now();
                inner.live.current_temp = status.current_temp;
                inner.live.has_new_timers = status.has_new_timers;

                if prior_state == ControllerState::Ready {
                    inner.live.desired_temp = status.desired_temp;
                    inner.live.fan_mode =
                        FanMode::from_booleans(status.fan_boost_is_on, status.flame_effect);
                    inner.live.fire_is_on = status.fire_is_on;
                } else {
                    self.reconcile(&mut inner, &status).await;
                    if prior_state == ControllerState::Disconnected {
                        if let Some(cb) = self.callbacks.upgrade() {
                            cb.controller_reconnected(&self.serial_number);
                        }
                    }
                }

                let changed = inner.live != inner.prior_snapshot;
                let stale = Instant::now().saturating_duration_since(inner.last_update)
                    >= self.config.notify_refresh_interval;
                if changed || stale {
                    inner.prior_snapshot = inner.live;
                    inner.last_update = Instant::now();
                    if let Some(cb) = self.callbacks.upgrade() {
                        cb.controller_update(&self.serial_number);
                    }
                }
            }
            None => {
                let silent_for = Instant::now().saturating_duration_since(inner.last_response);
                if silent_for < self.config.retry_timeout {
                    inner.state = ControllerState::NonResponsive;
                } else {
                    let was_disconnected = inner.state == ControllerState::Disconnected;
                    inner.state = ControllerState::Disconnected;
                    if !was_disconnected {
                        if let Some(cb) = self.callbacks.upgrade() {
                            cb.controller_disconnected(&self.serial_number, DisconnectCause::Timeout);
                        }
                    }
                }
            }
        }
    }

    /// Forces the device to match buffered client intent, in the order
    /// temperature, fan, then power — deliberately last, so the unit already
    /// has the right configuration by the time it turns on.
    async fn reconcile(&self, inner: &mut Inner, status: &StatusPayload) {
        let ip_address = inner.ip_address;

        if status.desired_temp != inner.live.desired_temp {
            let _ = self
                .send_and_record(ip_address, inner, Command::NewSetTemp(inner.live.desired_temp))
                .await;
        }

        let device_fan = FanMode::from_booleans(status.fan_boost_is_on, status.flame_effect);
        if device_fan != inner.live.fan_mode {
            let _ = self.sync_fan_mode(ip_address, inner, inner.live.fan_mode).await;
        }

        if status.fire_is_on != inner.live.fire_is_on {
            let cmd = if inner.live.fire_is_on {
                Command::PowerOn
            } else {
                Command::PowerOff
            };
            // Same BUSY-on-success rule as `set_on_ex`: entering BUSY happens
            // regardless of sync mode, so a power toggle discovered during
            // reconciliation still suppresses polling for the busy window.
            if self.send_and_record(ip_address, inner, cmd).await {
                inner.state = ControllerState::Busy;
                inner.busy_end_time = Instant::now() + self.config.on_off_busy_wait_time;
            }
        }
    }

    async fn send_and_record(&self, ip_address: IpAddr, inner: &mut Inner, cmd: Command) -> bool {
        let expected = cmd.expected_response();
        match self.datagram(ip_address).send_command(cmd).await {
            Ok(responses) => {
                let ok = responses
                    .get(&ip_address)
                    .map(|m| m.kind() == expected)
                    .unwrap_or(false);
                if ok {
                    inner.last_response = Instant::now();
                }
                ok
            }
            Err(e) => {
                warn!("{}: command {:?} failed: {}", self.serial_number, cmd, e);
                false
            }
        }
    }

    /// Returns whether at least one of the two transition steps succeeded.
    async fn sync_fan_mode(&self, ip_address: IpAddr, inner: &mut Inner, target: FanMode) -> bool {
        let (step1, step2) = fan_transition(target);
        let step1_ok = self.send_and_record(ip_address, inner, step1).await;
        let step2_ok = if step1_ok {
            self.send_and_record(ip_address, inner, step2).await
        } else {
            false
        };
        step1_ok || step2_ok
    }

    /// Turns the fireplace on or off.
    ///
    /// A no-op (no wire traffic, no state change) if `sync` is false and the
    /// cached value already matches. Entering BUSY happens unconditionally
    /// of `sync`, because even a buffered power change must hold off the
    /// poll loop once the device eventually executes it.
    pub async fn set_on(&self, on: bool) -> Result<(), EsceaError> {
        self.set_on_ex(on, false).await
    }

    pub async fn set_on_ex(&self, on: bool, sync: bool) -> Result<(), EsceaError> {
        let mut inner = self.inner.lock().await;
        if !sync && inner.live.fire_is_on == on {
            return Ok(());
        }
        inner.live.fire_is_on = on;

        if sync || inner.state == ControllerState::Ready {
            let ip_address = inner.ip_address;
            let cmd = if on { Command::PowerOn } else { Command::PowerOff };
            let sent_ok = self.send_and_record(ip_address, &mut inner, cmd).await;
            if sent_ok {
                inner.state = ControllerState::Busy;
                inner.busy_end_time = Instant::now() + self.config.on_off_busy_wait_time;
            }
            drop(inner);
            if !sync && sent_ok {
                self.refresh().await;
            }
        }
        Ok(())
    }

    /// Sets the fan mode, translating it into the device's two independent
    /// booleans via the documented AUTO/FAN_BOOST/FLAME_EFFECT transitions.
    pub async fn set_fan(&self, mode: FanMode) -> Result<(), EsceaError> {
        self.set_fan_ex(mode, false).await
    }

    pub async fn set_fan_ex(&self, mode: FanMode, sync: bool) -> Result<(), EsceaError> {
        let mut inner = self.inner.lock().await;
        if !sync && inner.live.fan_mode == mode {
            return Ok(());
        }
        inner.live.fan_mode = mode;

        if sync || inner.state == ControllerState::Ready {
            let ip_address = inner.ip_address;
            let sent_ok = self.sync_fan_mode(ip_address, &mut inner, mode).await;
            drop(inner);
            if !sync && sent_ok {
                self.refresh().await;
            }
        }
        Ok(())
    }

    /// Sets the desired temperature (rounded half-away-from-zero), rejecting
    /// values outside `[min_temp, max_temp]` without mutating the cache.
    pub async fn set_desired_temp(&self, degrees: f64) -> Result<(), EsceaError> {
        self.set_desired_temp_ex(degrees, false).await
    }

    pub async fn set_desired_temp_ex(&self, degrees: f64, sync: bool) -> Result<(), EsceaError> {
        let rounded = degrees.round();
        if rounded < self.config.min_set_temp as f64 || rounded > self.config.max_set_temp as f64 {
            error!(
                "desired_temp {} outside [{}, {}]",
                degrees, self.config.min_set_temp, self.config.max_set_temp
            );
            return Err(EsceaError::TempOutOfRange {
                value: rounded as i32,
                min: self.config.min_set_temp as i32,
                max: self.config.max_set_temp as i32,
            });
        }
        let rounded = rounded as u8;

        let mut inner = self.inner.lock().await;
        if !sync && inner.live.desired_temp == rounded {
            return Ok(());
        }
        inner.live.desired_temp = rounded;

        if sync || inner.state == ControllerState::Ready {
            let ip_address = inner.ip_address;
            let sent_ok = self
                .send_and_record(ip_address, &mut inner, Command::NewSetTemp(rounded))
                .await;
            drop(inner);
            if !sync && sent_ok {
                self.refresh().await;
            }
        }
        Ok(())
    }
}

fn fan_transition(target: FanMode) -> (Command, Command) {
    match target {
        FanMode::Auto => (Command::FanBoostOff, Command::FlameEffectOff),
        FanMode::FanBoost => (Command::FlameEffectOff, Command::FanBoostOn),
        FanMode::FlameEffect => (Command::FanBoostOff, Command::FlameEffectOn),
    }
}

fn as_status(msg: &FireplaceMessage) -> Option<&StatusPayload> {
    match msg {
        FireplaceMessage::Status(s) => Some(s),
        _ => None,
    }
}

fn settings_from_status(status: &StatusPayload) -> SystemSettings {
    SystemSettings {
        fire_is_on: status.fire_is_on,
        fan_mode: FanMode::from_booleans(status.fan_boost_is_on, status.flame_effect),
        desired_temp: status.desired_temp,
        current_temp: status.current_temp,
        has_new_timers: status.has_new_timers,
    }
}
