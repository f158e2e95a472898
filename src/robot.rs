//! Robot action model and the outbound seam to the host process.
//!
//! The runtime never talks to the motor bus directly. Actions are flattened
//! to the host's wire keys (`arm_<joint>.pos`, `x.vel`/`y.vel`/`theta.vel`)
//! and sent as one JSON datagram per control tick.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value, json};

/// Arm joints in bus order.
pub const ARM_JOINTS: [&str; 6] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow_flex",
    "wrist_flex",
    "wrist_roll",
    "gripper",
];

pub fn arm_key(joint: &str) -> String {
    format!("arm_{}.pos", joint)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArmPose(pub [f64; 6]);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseVelocity {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl BaseVelocity {
    pub const ZERO: BaseVelocity = BaseVelocity { x: 0.0, y: 0.0, theta: 0.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RobotAction {
    pub arm: Option<ArmPose>,
    pub base: Option<BaseVelocity>,
}

impl RobotAction {
    /// Arm rows command a still base so gestures don't drift the chassis.
    pub fn arm_step(pose: ArmPose) -> Self {
        Self { arm: Some(pose), base: Some(BaseVelocity::ZERO) }
    }

    pub fn base_step(vel: BaseVelocity) -> Self {
        Self { arm: None, base: Some(vel) }
    }

    /// Flat wire map, exactly the action dict the host consumes.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(arm) = &self.arm {
            for (joint, value) in ARM_JOINTS.iter().zip(arm.0.iter()) {
                map.insert(arm_key(joint), json!(value));
            }
        }
        if let Some(base) = &self.base {
            map.insert("x.vel".to_string(), json!(base.x));
            map.insert("y.vel".to_string(), json!(base.y));
            map.insert("theta.vel".to_string(), json!(base.theta));
        }
        Value::Object(map)
    }
}

/// Where actions go. Worker threads call this synchronously each tick.
pub trait ActionSink: Send + Sync {
    fn send(&self, action: &RobotAction) -> Result<()>;
}

/// One JSON datagram per action to the host process.
pub struct UdpActionSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpActionSink {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind action socket")?;
        let target = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve action target {}:{}", host, port))?
            .next()
            .ok_or_else(|| anyhow!("No address for action target {}:{}", host, port))?;
        log::info!("Action sink -> {}", target);
        Ok(Self { socket, target })
    }
}

impl ActionSink for UdpActionSink {
    fn send(&self, action: &RobotAction) -> Result<()> {
        let payload = serde_json::to_vec(&action.to_json())?;
        self.socket
            .send_to(&payload, self.target)
            .context("Failed to send action datagram")?;
        Ok(())
    }
}

/// Swallows actions; used by dry runs.
pub struct NullSink;

impl ActionSink for NullSink {
    fn send(&self, _action: &RobotAction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn arm_step_holds_the_base_still() {
        let action = RobotAction::arm_step(ArmPose([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let value = action.to_json();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 9);
        assert_eq!(obj["arm_shoulder_pan.pos"], json!(1.0));
        assert_eq!(obj["arm_gripper.pos"], json!(6.0));
        assert_eq!(obj["x.vel"], json!(0.0));
        assert_eq!(obj["theta.vel"], json!(0.0));
    }

    #[test]
    fn base_step_carries_no_arm_keys() {
        let action = RobotAction::base_step(BaseVelocity { x: 0.1, y: -0.2, theta: 30.0 });
        let value = action.to_json();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["y.vel"], json!(-0.2));
        assert!(!obj.contains_key("arm_shoulder_pan.pos"));
    }

    #[test]
    fn udp_sink_delivers_a_parseable_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = UdpActionSink::new("127.0.0.1", port).unwrap();
        sink.send(&RobotAction::arm_step(ArmPose::default())).unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value["arm_wrist_roll.pos"], json!(0.0));
        assert_eq!(value["x.vel"], json!(0.0));
    }
}
