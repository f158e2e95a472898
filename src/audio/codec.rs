//! Opus framing for the voice link.
//!
//! The link runs mono Opus at the capture rate (16 kHz on LeKiwi), so there
//! is no resampling stage: the encoder mixes the interleaved capture
//! channels down to mono and encodes fixed-duration frames; the decoder
//! fans the mono stream back out to the playback channel count.

use anyhow::{Result, bail};

/// Frame durations libopus accepts for encode.
const LEGAL_FRAME_MS: [u32; 4] = [10, 20, 40, 60];

pub struct Encoder {
    encoder: opus::Encoder,
    sample_rate: u32,
    input_channels: u32,
    frame_ms: u32,
}

impl Encoder {
    /// `input_channels` is the ALSA capture channel count; the encoded
    /// stream is always mono.
    pub fn new(sample_rate: u32, input_channels: u32, frame_ms: u32, bitrate: i32) -> Result<Self> {
        if !LEGAL_FRAME_MS.contains(&frame_ms) {
            bail!("Unsupported Opus frame duration {} ms", frame_ms);
        }
        if input_channels == 0 {
            bail!("Capture channel count must be nonzero");
        }
        let mut encoder =
            opus::Encoder::new(sample_rate, opus::Channels::Mono, opus::Application::Voip)?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;
        Ok(Self { encoder, sample_rate, input_channels, frame_ms })
    }

    /// Samples per channel in one frame.
    pub fn samples_per_channel(&self) -> usize {
        (self.sample_rate * self.frame_ms / 1000) as usize
    }

    /// Interleaved i16 count the capture side must hand to `encode`.
    pub fn input_frame_samples(&self) -> usize {
        self.samples_per_channel() * self.input_channels as usize
    }

    /// Encode one interleaved frame. Input length must be exactly
    /// `input_frame_samples()`.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != self.input_frame_samples() {
            bail!(
                "Encode input must be {} samples, got {}",
                self.input_frame_samples(),
                pcm.len()
            );
        }
        let mono = self.mixdown(pcm);
        let mut packet = vec![0u8; 4000];
        let len = self.encoder.encode(&mono, &mut packet)?;
        packet.truncate(len);
        Ok(packet)
    }

    /// Average the capture channels into one.
    fn mixdown(&self, pcm: &[i16]) -> Vec<i16> {
        let channels = self.input_channels as usize;
        if channels == 1 {
            return pcm.to_vec();
        }
        let frames = pcm.len() / channels;
        let mut mono = vec![0i16; frames];
        for (i, sample) in mono.iter_mut().enumerate() {
            let sum: i32 = pcm[i * channels..(i + 1) * channels]
                .iter()
                .map(|&s| s as i32)
                .sum();
            *sample = (sum / channels as i32) as i16;
        }
        mono
    }
}

pub struct Decoder {
    decoder: opus::Decoder,
    output_channels: u32,
}

impl Decoder {
    /// Decodes the mono agent stream, duplicating out to `output_channels`
    /// for the playback device.
    pub fn new(sample_rate: u32, output_channels: u32) -> Result<Self> {
        if output_channels == 0 {
            bail!("Playback channel count must be nonzero");
        }
        let decoder = opus::Decoder::new(sample_rate, opus::Channels::Mono)?;
        Ok(Self { decoder, output_channels })
    }

    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        // 120 ms is the longest packet Opus allows; 6000 covers it at 48 kHz
        let mut mono = vec![0i16; 6000];
        let frames = self.decoder.decode(packet, &mut mono, false)?;
        mono.truncate(frames);

        if self.output_channels == 1 {
            return Ok(mono);
        }
        let channels = self.output_channels as usize;
        let mut out = vec![0i16; frames * channels];
        for (i, &sample) in mono.iter().enumerate() {
            for c in 0..channels {
                out[i * channels + c] = sample;
            }
        }
        Ok(out)
    }
}
