//! End-to-end scenarios against a small stateful fireplace simulator bound
//! to loopback addresses. Linux routes the whole 127.0.0.0/8 block to `lo`,
//! so distinct addresses stand in for distinct physical fireplaces without
//! any extra network setup.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use escea::config::Config;
use escea::controller::{Controller, ControllerCallbacks, DisconnectCause, FanMode};
use escea::message;

struct NoCallbacks;
impl ControllerCallbacks for NoCallbacks {
    fn controller_disconnected(&self, _serial_number: &str, _cause: DisconnectCause) {}
    fn controller_reconnected(&self, _serial_number: &str) {}
    fn controller_update(&self, _serial_number: &str) {}
}

/// A fireplace that actually tracks power/fan/temperature state and reacts
/// to commands the way a real device would.
struct SimulatedFireplace {
    fire_is_on: AtomicBool,
    fan_boost_is_on: AtomicBool,
    flame_effect: AtomicBool,
    desired_temp: AtomicU8,
    current_temp: AtomicU8,
}

impl SimulatedFireplace {
    fn new(desired_temp: u8, current_temp: u8) -> Arc<Self> {
        Arc::new(Self {
            fire_is_on: AtomicBool::new(false),
            fan_boost_is_on: AtomicBool::new(false),
            flame_effect: AtomicBool::new(false),
            desired_temp: AtomicU8::new(desired_temp),
            current_temp: AtomicU8::new(current_temp),
        })
    }

    fn status(&self) -> message::StatusPayload {
        message::StatusPayload {
            fire_is_on: self.fire_is_on.load(Ordering::SeqCst),
            fan_boost_is_on: self.fan_boost_is_on.load(Ordering::SeqCst),
            flame_effect: self.flame_effect.load(Ordering::SeqCst),
            desired_temp: self.desired_temp.load(Ordering::SeqCst),
            current_temp: self.current_temp.load(Ordering::SeqCst),
            has_new_timers: false,
        }
    }

    async fn serve(self: Arc<Self>, addr: Ipv4Addr) -> u16 {
        let socket = UdpSocket::bind((addr, 0)).await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                if len == 0 {
                    continue;
                }
                let ack = self.apply_and_ack(buf[0], buf.get(1).copied());
                let _ = socket.send_to(&ack, from).await;
            }
        });
        port
    }

    fn apply_and_ack(&self, opcode: u8, payload: Option<u8>) -> Vec<u8> {
        match opcode {
            0x02 => message::encode_status(&self.status()), // STATUS_PLEASE
            0x03 => {
                self.fire_is_on.store(true, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::PowerOnAck)
            }
            0x04 => {
                self.fire_is_on.store(false, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::PowerOffAck)
            }
            0x05 => {
                self.fan_boost_is_on.store(true, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::FanBoostOnAck)
            }
            0x06 => {
                self.fan_boost_is_on.store(false, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::FanBoostOffAck)
            }
            0x07 => {
                self.flame_effect.store(true, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::FlameEffectOnAck)
            }
            0x08 => {
                self.flame_effect.store(false, Ordering::SeqCst);
                message::encode_ack(message::ResponseKind::FlameEffectOffAck)
            }
            0x09 => {
                if let Some(temp) = payload {
                    self.desired_temp.store(temp, Ordering::SeqCst);
                }
                message::encode_ack(message::ResponseKind::NewSetTempAck)
            }
            _ => message::encode_status(&self.status()),
        }
    }
}

async fn start_controller(
    addr: Ipv4Addr,
    config: Config,
) -> (Arc<Controller>, Arc<SimulatedFireplace>) {
    let fireplace = SimulatedFireplace::new(20, 18);
    let port = fireplace.clone().serve(addr).await;
    let config = config.with_port(port);

    let callbacks: std::sync::Weak<dyn ControllerCallbacks> = std::sync::Weak::<NoCallbacks>::new();
    let controller = Controller::initialize(
        format!("SERIAL-{}", addr),
        std::net::IpAddr::V4(addr),
        config,
        escea::datagram::new_send_token(),
        callbacks,
    )
    .await
    .unwrap();

    (Arc::new(controller), fireplace)
}

#[tokio::test]
async fn power_toggle_enters_busy_and_buffers_temp_change() {
    let config = Config::default()
        .with_request_timeout(Duration::from_millis(500))
        .with_on_off_busy_wait_time(Duration::from_millis(150));
    let (controller, fireplace) =
        start_controller(Ipv4Addr::new(127, 0, 0, 30), config).await;

    controller.set_on(true).await.unwrap();
    assert!(fireplace.fire_is_on.load(Ordering::SeqCst));
    assert_eq!(
        controller.state().await,
        escea::controller::ControllerState::Busy
    );

    // Buffered while busy: no wire traffic for this yet.
    controller.set_desired_temp_ex(24.0, false).await.unwrap();
    assert_eq!(fireplace.desired_temp.load(Ordering::SeqCst), 20);
    assert_eq!(controller.settings().await.desired_temp, 24);

    tokio::time::sleep(Duration::from_millis(250)).await;
    // This test drives reconciliation directly with a forced (sync) setter
    // rather than spawning `Controller::run`, since the busy window has
    // elapsed and the buffered value still needs to reach the device.
    controller.set_desired_temp_ex(24.0, true).await.unwrap();
    assert_eq!(fireplace.desired_temp.load(Ordering::SeqCst), 24);
}

#[tokio::test]
async fn fan_transition_auto_to_fan_boost_to_flame_effect() {
    let config = Config::default().with_request_timeout(Duration::from_millis(500));
    let (controller, fireplace) =
        start_controller(Ipv4Addr::new(127, 0, 0, 31), config).await;

    controller.set_fan(FanMode::FanBoost).await.unwrap();
    assert!(fireplace.fan_boost_is_on.load(Ordering::SeqCst));
    assert!(!fireplace.flame_effect.load(Ordering::SeqCst));

    controller.set_fan(FanMode::FlameEffect).await.unwrap();
    assert!(!fireplace.fan_boost_is_on.load(Ordering::SeqCst));
    assert!(fireplace.flame_effect.load(Ordering::SeqCst));

    // Never both on at once.
    assert!(!(fireplace.fan_boost_is_on.load(Ordering::SeqCst)
        && fireplace.flame_effect.load(Ordering::SeqCst)));
}

#[tokio::test]
async fn set_desired_temp_rejects_below_minimum() {
    let config = Config::default().with_request_timeout(Duration::from_millis(500));
    let (controller, _fireplace) =
        start_controller(Ipv4Addr::new(127, 0, 0, 32), config).await;

    let err = controller.set_desired_temp(1.0).await.unwrap_err();
    assert!(matches!(err, escea::error::EsceaError::TempOutOfRange { .. }));
}

#[tokio::test]
async fn repeated_identical_setter_sends_wire_traffic_once() {
    let config = Config::default().with_request_timeout(Duration::from_millis(500));
    let (controller, fireplace) =
        start_controller(Ipv4Addr::new(127, 0, 0, 33), config).await;

    controller.set_fan(FanMode::Auto).await.unwrap();
    let after_first = (
        fireplace.fan_boost_is_on.load(Ordering::SeqCst),
        fireplace.flame_effect.load(Ordering::SeqCst),
    );
    // Second call with the same value is a no-op per the setter contract.
    controller.set_fan(FanMode::Auto).await.unwrap();
    let after_second = (
        fireplace.fan_boost_is_on.load(Ordering::SeqCst),
        fireplace.flame_effect.load(Ordering::SeqCst),
    );
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn refresh_address_updates_device_ip() {
    let config = Config::default().with_request_timeout(Duration::from_millis(500));
    let (controller, _fireplace) =
        start_controller(Ipv4Addr::new(127, 0, 0, 34), config).await;

    let new_addr = Ipv4Addr::new(127, 0, 0, 35);
    controller.refresh_address(std::net::IpAddr::V4(new_addr)).await;
    assert_eq!(controller.device_ip().await, std::net::IpAddr::V4(new_addr));
}
