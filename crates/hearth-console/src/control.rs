/// Out-of-band request a viewer sends on its control channel (WebSocket ping
/// payloads for the agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    MuteEcho,
    UnmuteEcho,
    KeepAlive,
}

impl ControlSignal {
    pub fn parse(payload: &[u8]) -> Self {
        match std::str::from_utf8(payload).map(str::trim) {
            Ok("no-repeat" | "mute-echo") => ControlSignal::MuteEcho,
            Ok("repeat" | "unmute-echo") => ControlSignal::UnmuteEcho,
            _ => ControlSignal::KeepAlive,
        }
    }
}
