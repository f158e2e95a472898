//! WM8960 codec bring-up through the ALSA mixer.
//!
//! The codec is configured by writing a fixed, ordered table of mixer
//! controls, addressed strictly by `numid` (control names vary between
//! driver revisions; the names kept here are documentation). Writes go
//! through the `amixer` binary so the numbering matches what
//! `amixer -c <card> controls` shows on the device.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};

#[derive(Debug, Clone, Copy)]
pub struct MixerWrite {
    pub numid: u32,
    pub values: &'static [i64],
    pub name: &'static str,
}

/// The codec setup sequence, applied in table order (ascending numid).
/// A single value applies to every channel of a multichannel control.
pub const CODEC_SETUP: &[MixerWrite] = &[
    MixerWrite { numid: 3, values: &[1], name: "Capture Switch" },
    MixerWrite { numid: 8, values: &[230, 230], name: "Playback Volume" },
    MixerWrite { numid: 9, values: &[230, 230], name: "Capture Volume" },
    MixerWrite { numid: 13, values: &[121, 121], name: "Headphone Playback Volume" },
    MixerWrite { numid: 19, values: &[121, 121], name: "Speaker Playback Volume" },
    MixerWrite { numid: 26, values: &[1], name: "Left Output Mixer PCM Playback Switch" },
    MixerWrite { numid: 27, values: &[1], name: "Right Output Mixer PCM Playback Switch" },
    MixerWrite { numid: 28, values: &[1], name: "Left Input Mixer Boost Switch" },
    MixerWrite { numid: 29, values: &[1], name: "Right Input Mixer Boost Switch" },
    MixerWrite { numid: 35, values: &[3], name: "Left Input Boost Mixer LINPUT1 Volume" },
    MixerWrite { numid: 36, values: &[3], name: "Right Input Boost Mixer RINPUT1 Volume" },
    MixerWrite { numid: 50, values: &[1], name: "ADC High Pass Filter Switch" },
    MixerWrite { numid: 51, values: &[1], name: "Noise Gate Switch" },
];

/// Mixer register access. The real implementation shells out to `amixer`;
/// tests substitute an in-memory fake.
pub trait Amixer {
    fn cset(&self, card: u32, numid: u32, values: &[i64]) -> Result<()>;
    fn cget(&self, card: u32, numid: u32) -> Result<Vec<i64>>;
}

pub struct SystemAmixer;

impl Amixer for SystemAmixer {
    fn cset(&self, card: u32, numid: u32, values: &[i64]) -> Result<()> {
        let args = cset_args(card, numid, values);
        let output = Command::new("amixer")
            .args(&args)
            .output()
            .context("Failed to run amixer (is alsa-utils installed?)")?;
        if !output.status.success() {
            bail!(
                "amixer {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn cget(&self, card: u32, numid: u32) -> Result<Vec<i64>> {
        let args = cget_args(card, numid);
        let output = Command::new("amixer")
            .args(&args)
            .output()
            .context("Failed to run amixer (is alsa-utils installed?)")?;
        if !output.status.success() {
            bail!(
                "amixer {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_cget_values(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn cset_args(card: u32, numid: u32, values: &[i64]) -> Vec<String> {
    vec![
        "-c".to_string(),
        card.to_string(),
        "cset".to_string(),
        format!("numid={}", numid),
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(","),
    ]
}

pub fn cget_args(card: u32, numid: u32) -> Vec<String> {
    vec![
        "-c".to_string(),
        card.to_string(),
        "cget".to_string(),
        format!("numid={}", numid),
    ]
}

/// Extract the `: values=` line from `amixer cget` output. Boolean controls
/// report `on`/`off`, integer controls report numbers.
pub fn parse_cget_values(output: &str) -> Result<Vec<i64>> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with(": values="))
        .ok_or_else(|| anyhow!("No values line in amixer output"))?;
    let raw = &line[": values=".len()..];
    raw.split(',')
        .map(|token| {
            let token = token.trim();
            match token {
                "on" => Ok(1),
                "off" => Ok(0),
                _ => token
                    .parse::<i64>()
                    .map_err(|_| anyhow!("Unparseable mixer value '{}'", token)),
            }
        })
        .collect()
}

/// Run the whole setup sequence. A failed write is logged and the sequence
/// continues; the error at the end reports how many writes failed.
pub fn apply_codec_setup(mixer: &dyn Amixer, card: u32) -> Result<()> {
    let mut failed = 0usize;
    for write in CODEC_SETUP {
        log::debug!(
            "amixer -c {} cset numid={} ({}) <- {:?}",
            card,
            write.numid,
            write.name,
            write.values
        );
        if let Err(e) = mixer.cset(card, write.numid, write.values) {
            log::error!("Mixer write numid={} ({}) failed: {}", write.numid, write.name, e);
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} mixer writes failed", failed, CODEC_SETUP.len());
    }
    log::info!("Codec setup applied: {} controls on card {}", CODEC_SETUP.len(), card);
    Ok(())
}

/// Read every control back and compare with the table. All mismatches are
/// reported, not just the first. The canonical check: the capture volume
/// register (numid 9) reads 230 after setup.
pub fn verify_codec_setup(mixer: &dyn Amixer, card: u32) -> Result<()> {
    let mut problems = Vec::new();
    for write in CODEC_SETUP {
        match mixer.cget(card, write.numid) {
            Ok(actual) => {
                if !values_match(write.values, &actual) {
                    problems.push(format!(
                        "numid={} ({}): expected {:?}, read {:?}",
                        write.numid, write.name, write.values, actual
                    ));
                }
            }
            Err(e) => {
                problems.push(format!("numid={} ({}): read failed: {}", write.numid, write.name, e));
            }
        }
    }
    if !problems.is_empty() {
        bail!("Codec verification failed:\n  {}", problems.join("\n  "));
    }
    log::info!("Codec verification passed on card {}", card);
    Ok(())
}

/// amixer repeats the last given value for remaining channels, so a
/// single-value write must match on every read-back channel.
fn values_match(expected: &[i64], actual: &[i64]) -> bool {
    if actual.is_empty() || actual.len() < expected.len() {
        return false;
    }
    actual.iter().enumerate().all(|(ch, &v)| {
        let want = expected[ch.min(expected.len() - 1)];
        v == want
    })
}

/// The `amixer` command lines the setup would run, for `--dry-run`.
pub fn render_dry_run(card: u32) -> Vec<String> {
    CODEC_SETUP
        .iter()
        .map(|w| format!("amixer {}", cset_args(card, w.numid, w.values).join(" ")))
        .collect()
}

/// Copy the repo's `.asoundrc` into the home directory. A missing source is
/// a warning and `Ok(false)`, matching the setup script it replaces.
pub fn install_asoundrc(source: &Path, home: &Path) -> Result<bool> {
    if !source.exists() {
        log::warn!(
            "asoundrc source {} not found, skipping ~/.asoundrc install",
            source.display()
        );
        return Ok(false);
    }
    let dest = home.join(".asoundrc");
    std::fs::copy(source, &dest)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
    log::info!("Installed {}", dest.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAmixer {
        registers: Mutex<HashMap<u32, Vec<i64>>>,
        fail_numids: Vec<u32>,
    }

    impl Amixer for FakeAmixer {
        fn cset(&self, _card: u32, numid: u32, values: &[i64]) -> Result<()> {
            if self.fail_numids.contains(&numid) {
                bail!("Invalid ID");
            }
            self.registers.lock().unwrap().insert(numid, values.to_vec());
            Ok(())
        }

        fn cget(&self, _card: u32, numid: u32) -> Result<Vec<i64>> {
            self.registers
                .lock()
                .unwrap()
                .get(&numid)
                .cloned()
                .ok_or_else(|| anyhow!("Cannot find the given element"))
        }
    }

    #[test]
    fn table_covers_the_codec_registers_in_order() {
        let numids: Vec<u32> = CODEC_SETUP.iter().map(|w| w.numid).collect();
        assert_eq!(numids, vec![3, 8, 9, 13, 19, 26, 27, 28, 29, 35, 36, 50, 51]);
        let capture = CODEC_SETUP.iter().find(|w| w.numid == 9).unwrap();
        assert!(capture.values.iter().all(|&v| v == 230));
    }

    #[test]
    fn cset_args_shape() {
        assert_eq!(
            cset_args(2, 9, &[230, 230]),
            vec!["-c", "2", "cset", "numid=9", "230,230"]
        );
        assert_eq!(cset_args(2, 3, &[1]), vec!["-c", "2", "cset", "numid=3", "1"]);
    }

    #[test]
    fn dry_run_renders_every_write() {
        let lines = render_dry_run(2);
        assert_eq!(lines.len(), CODEC_SETUP.len());
        assert_eq!(lines[0], "amixer -c 2 cset numid=3 1");
        assert_eq!(lines[2], "amixer -c 2 cset numid=9 230,230");
    }

    #[test]
    fn parses_integer_cget_output() {
        let output = "numid=9,iface=MIXER,name='Capture Volume'\n\
                      ; type=INTEGER,access=rw---R--,values=2,min=0,max=255,step=0\n\
                      : values=230,230\n\
                      | dBscale-min=-97.00dB,step=0.50dB,mute=0\n";
        assert_eq!(parse_cget_values(output).unwrap(), vec![230, 230]);
    }

    #[test]
    fn parses_boolean_cget_output() {
        let output = "numid=51,iface=MIXER,name='Noise Gate Switch'\n\
                      ; type=BOOLEAN,access=rw------,values=1\n\
                      : values=on\n";
        assert_eq!(parse_cget_values(output).unwrap(), vec![1]);
        let off = "  : values=off,on\n";
        assert_eq!(parse_cget_values(off).unwrap(), vec![0, 1]);
    }

    #[test]
    fn rejects_output_without_values() {
        assert!(parse_cget_values("numid=9,iface=MIXER\n").is_err());
        assert!(parse_cget_values(": values=abc\n").is_err());
    }

    #[test]
    fn apply_then_verify_round_trips() {
        let fake = FakeAmixer::default();
        apply_codec_setup(&fake, 2).unwrap();
        verify_codec_setup(&fake, 2).unwrap();
    }

    #[test]
    fn a_failed_write_does_not_stop_the_sequence() {
        let fake = FakeAmixer { fail_numids: vec![13], ..Default::default() };
        let err = apply_codec_setup(&fake, 2).unwrap_err();
        assert!(err.to_string().contains("1 of 13"));
        // Later writes still landed
        assert_eq!(fake.cget(2, 51).unwrap(), vec![1]);
    }

    #[test]
    fn verify_reports_the_drifted_register() {
        let fake = FakeAmixer::default();
        apply_codec_setup(&fake, 2).unwrap();
        fake.registers.lock().unwrap().insert(9, vec![200, 230]);
        let err = verify_codec_setup(&fake, 2).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("numid=9"), "{}", msg);
        assert!(msg.contains("230"), "{}", msg);
    }

    #[test]
    fn single_value_matches_all_channels() {
        assert!(values_match(&[1], &[1, 1]));
        assert!(!values_match(&[1], &[1, 0]));
        assert!(values_match(&[230, 230], &[230, 230]));
        assert!(!values_match(&[230, 230], &[230]));
        assert!(!values_match(&[1], &[]));
    }

    #[test]
    fn installs_asoundrc_into_home() {
        let home = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("asoundrc");
        std::fs::write(&source, "pcm.!default {}\n").unwrap();

        assert!(install_asoundrc(&source, home.path()).unwrap());
        let installed = std::fs::read_to_string(home.path().join(".asoundrc")).unwrap();
        assert_eq!(installed, "pcm.!default {}\n");
    }

    #[test]
    fn missing_asoundrc_source_is_not_fatal() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("no-such-asoundrc");
        assert!(!install_asoundrc(&missing, home.path()).unwrap());
        assert!(!home.path().join(".asoundrc").exists());
    }
}
