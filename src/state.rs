//! Coarse runtime state, driven by the agent link and audio flow.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Connected, nothing in flight
    Idle,
    /// Mic frames are streaming to the agent
    Listening,
    /// Agent TTS audio is playing
    Speaking,
    /// Link down, waiting for reconnect
    NetworkError,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Idle => "idle",
            SystemState::Listening => "listening",
            SystemState::Speaking => "speaking",
            SystemState::NetworkError => "network-error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(SystemState::Idle.to_string(), "idle");
        assert_eq!(SystemState::Speaking.to_string(), "speaking");
    }
}
