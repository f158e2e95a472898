//! Audio: ALSA capture/playback, Opus framing for the agent link, and the
//! speaker/microphone hardware checks.

mod alsa_device;
mod codec;
mod system;
pub mod tone;

pub use codec::{Decoder, Encoder};
pub use system::AudioSystem;
