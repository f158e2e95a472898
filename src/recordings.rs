//! CSV motion recordings: choreographed arm gestures and wheel paths,
//! stored under `<root>/{arm,wheels}/<name>.csv`.
//!
//! Arm schema: `timestamp` + one `arm_<joint>.pos` column per joint.
//! Wheels schema: `timestamp,x.vel,y.vel,theta.vel`.
//! Timestamps are informational; playback is paced by fps.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};

use crate::robot::{ARM_JOINTS, ArmPose, BaseVelocity, arm_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingKind {
    Arm,
    Wheels,
}

impl RecordingKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordingKind::Arm => "arm",
            RecordingKind::Wheels => "wheels",
        }
    }
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for RecordingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "arm" => Ok(RecordingKind::Arm),
            "wheels" => Ok(RecordingKind::Wheels),
            other => Err(anyhow!("Unknown recording type '{}' (expected arm or wheels)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedArmRow {
    pub timestamp: f64,
    pub pose: ArmPose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedBaseRow {
    pub timestamp: f64,
    pub velocity: BaseVelocity,
}

#[derive(Debug, Clone)]
pub struct RecordingStore {
    root: PathBuf,
}

impl RecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: RecordingKind, name: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{}.csv", name))
    }

    /// Sorted recording names (file stems) for one kind. A missing directory
    /// is just an empty repertoire.
    pub fn list(&self, kind: RecordingKind) -> Vec<String> {
        let dir = self.root.join(kind.dir_name());
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "csv") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }

    pub fn list_all(&self) -> Vec<(RecordingKind, String)> {
        let mut all = Vec::new();
        for kind in [RecordingKind::Arm, RecordingKind::Wheels] {
            for name in self.list(kind) {
                all.push((kind, name));
            }
        }
        all
    }

    pub fn load_arm(&self, name: &str) -> Result<Vec<TimedArmRow>> {
        let path = self.path(RecordingKind::Arm, name);
        let text = read_recording(&path)?;
        let expected: Vec<String> = ARM_JOINTS.iter().map(|j| arm_key(j)).collect();
        let table = parse_csv(&text, &expected)
            .with_context(|| format!("Malformed recording {}", path.display()))?;
        Ok(table
            .into_iter()
            .map(|(timestamp, values)| {
                let mut pose = ArmPose::default();
                pose.0.copy_from_slice(&values);
                TimedArmRow { timestamp, pose }
            })
            .collect())
    }

    pub fn load_wheels(&self, name: &str) -> Result<Vec<TimedBaseRow>> {
        let path = self.path(RecordingKind::Wheels, name);
        let text = read_recording(&path)?;
        let expected = ["x.vel".to_string(), "y.vel".to_string(), "theta.vel".to_string()];
        let table = parse_csv(&text, &expected)
            .with_context(|| format!("Malformed recording {}", path.display()))?;
        Ok(table
            .into_iter()
            .map(|(timestamp, values)| TimedBaseRow {
                timestamp,
                velocity: BaseVelocity { x: values[0], y: values[1], theta: values[2] },
            })
            .collect())
    }

    pub fn save_arm(&self, name: &str, rows: &[TimedArmRow]) -> Result<PathBuf> {
        let header: Vec<String> = std::iter::once("timestamp".to_string())
            .chain(ARM_JOINTS.iter().map(|j| arm_key(j)))
            .collect();
        let mut lines = vec![header.join(",")];
        for row in rows {
            let mut fields = vec![row.timestamp.to_string()];
            fields.extend(row.pose.0.iter().map(|v| v.to_string()));
            lines.push(fields.join(","));
        }
        self.write_recording(RecordingKind::Arm, name, &lines)
    }

    pub fn save_wheels(&self, name: &str, rows: &[TimedBaseRow]) -> Result<PathBuf> {
        let mut lines = vec!["timestamp,x.vel,y.vel,theta.vel".to_string()];
        for row in rows {
            lines.push(format!(
                "{},{},{},{}",
                row.timestamp, row.velocity.x, row.velocity.y, row.velocity.theta
            ));
        }
        self.write_recording(RecordingKind::Wheels, name, &lines)
    }

    fn write_recording(
        &self,
        kind: RecordingKind,
        name: &str,
        lines: &[String],
    ) -> Result<PathBuf> {
        let path = self.path(kind, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn read_recording(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Recording not found: {}", path.display());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Header-driven parse: locate `timestamp` plus every expected column by
/// name (extra columns are ignored), then pull those fields from each row.
fn parse_csv(text: &str, expected: &[String]) -> Result<Vec<(f64, Vec<f64>)>> {
    let mut lines = text.lines().enumerate();
    let (_, header) = lines
        .next()
        .ok_or_else(|| anyhow!("Empty recording file"))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    let col_index = |key: &str| -> Result<usize> {
        columns
            .iter()
            .position(|c| *c == key)
            .ok_or_else(|| anyhow!("Missing column '{}' in header", key))
    };
    let ts_idx = col_index("timestamp")?;
    let value_idx: Vec<usize> = expected
        .iter()
        .map(|key| col_index(key))
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |idx: usize| -> Result<f64> {
            let raw = fields
                .get(idx)
                .ok_or_else(|| anyhow!("Line {}: too few fields", line_no + 1))?;
            raw.parse::<f64>()
                .map_err(|_| anyhow!("Line {}: '{}' is not a number", line_no + 1, raw))
        };
        let timestamp = field(ts_idx)?;
        let values = value_idx
            .iter()
            .map(|&idx| field(idx))
            .collect::<Result<Vec<f64>>>()?;
        rows.push((timestamp, values));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RecordingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn arm_round_trip() {
        let (_dir, store) = store();
        let rows = vec![
            TimedArmRow { timestamp: 0.0, pose: ArmPose([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]) },
            TimedArmRow { timestamp: 0.033, pose: ArmPose([1.5, 2.5, 3.5, 4.5, 5.5, 6.5]) },
        ];
        store.save_arm("wave", &rows).unwrap();
        let loaded = store.load_arm("wave").unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn wheels_round_trip() {
        let (_dir, store) = store();
        let rows = vec![TimedBaseRow {
            timestamp: 0.0,
            velocity: BaseVelocity { x: 0.1, y: -0.1, theta: 15.0 },
        }];
        store.save_wheels("spin", &rows).unwrap();
        let loaded = store.load_wheels("spin").unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn listing_is_sorted_and_csv_only() {
        let (_dir, store) = store();
        store.save_arm("nod", &[]).unwrap();
        store.save_arm("wake_up", &[]).unwrap();
        std::fs::write(store.root().join("arm").join("notes.txt"), "x").unwrap();
        assert_eq!(store.list(RecordingKind::Arm), vec!["nod", "wake_up"]);
        assert!(store.list(RecordingKind::Wheels).is_empty());
    }

    #[test]
    fn list_all_spans_both_kinds() {
        let (_dir, store) = store();
        store.save_arm("nod", &[]).unwrap();
        store.save_wheels("spin", &[]).unwrap();
        let all = store.list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], (RecordingKind::Arm, "nod".to_string()));
        assert_eq!(all[1], (RecordingKind::Wheels, "spin".to_string()));
    }

    #[test]
    fn missing_recording_names_the_path() {
        let (_dir, store) = store();
        let err = store.load_arm("ghost").unwrap_err();
        assert!(err.to_string().contains("ghost.csv"));
    }

    #[test]
    fn shuffled_and_extra_columns_are_fine() {
        let (_dir, store) = store();
        let dir = store.root().join("wheels");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("mixed.csv"),
            "theta.vel,note,timestamp,x.vel,y.vel\n2.0,hi,0.5,0.1,0.2\n",
        )
        .unwrap();
        let rows = store.load_wheels("mixed").unwrap();
        assert_eq!(rows[0].timestamp, 0.5);
        assert_eq!(rows[0].velocity.theta, 2.0);
        assert_eq!(rows[0].velocity.x, 0.1);
    }

    #[test]
    fn malformed_value_reports_the_line() {
        let (_dir, store) = store();
        let dir = store.root().join("wheels");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("bad.csv"),
            "timestamp,x.vel,y.vel,theta.vel\n0.0,0.1,0.2,0.3\n0.1,oops,0.2,0.3\n",
        )
        .unwrap();
        let err = store.load_wheels("bad").unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Line 3"), "{}", msg);
        assert!(msg.contains("oops"), "{}", msg);
    }

    #[test]
    fn missing_column_is_an_error() {
        let (_dir, store) = store();
        let dir = store.root().join("arm");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("short.csv"), "timestamp,arm_gripper.pos\n0.0,1.0\n").unwrap();
        let err = store.load_arm("short").unwrap_err();
        assert!(format!("{:#}", err).contains("arm_shoulder_pan.pos"));
    }
}
