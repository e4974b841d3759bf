//! Voice-transcribed exercise records.
//!
//! The transcription collaborator produces one JSON object per line:
//!
//! ```text
//! {"exercise":"Push-ups","sets":3,"reps":15}
//! {"exercise":"Bench Press","sets":4,"reps":8,"weight_kg":62.5}
//! {"exercise":"Plank","sets":3,"duration_seconds":45}
//! ```
//!
//! Records become ordinary exercise-log entries; nothing here knows about
//! audio or natural language.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{Error, ExerciseValues, Load, NewExerciseLog, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoiceRecord {
    pub exercise: String,
    pub sets: u32,
    #[serde(default)]
    pub reps: Option<u32>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

impl VoiceRecord {
    pub fn reps(exercise: impl Into<String>, sets: u32, reps: u32) -> Self {
        Self {
            exercise: exercise.into(),
            sets,
            reps: Some(reps),
            weight_kg: None,
            duration_seconds: None,
        }
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.exercise.trim().is_empty() {
            return Err(Error::Validation("voice record has no exercise name".into()));
        }
        if self.sets == 0 {
            return Err(Error::Validation(format!(
                "voice record for {} has zero sets",
                self.exercise
            )));
        }
        if self.reps.is_none() && self.duration_seconds.is_none() {
            return Err(Error::Validation(format!(
                "voice record for {} has neither reps nor duration",
                self.exercise
            )));
        }
        Ok(())
    }

    pub fn values(&self) -> ExerciseValues {
        let load = match self.weight_kg {
            Some(kg) if kg > 0.0 => Load::Kilograms(kg),
            _ => Load::Bodyweight,
        };
        let reps = self.reps.map(|r| r.to_string()).unwrap_or_default();
        let mut values = ExerciseValues::new(self.sets, reps, load);
        values.duration_seconds = self.duration_seconds;
        values
    }

    pub fn to_log(&self, position: u32) -> NewExerciseLog {
        NewExerciseLog::new(self.exercise.trim(), self.values(), position)
    }
}

/// Read voice records from a JSONL file.
///
/// Blank lines are ignored. Lines that fail to parse or validate are
/// skipped with a warning so one garbled utterance doesn't lose the rest.
pub fn read_voice_records(path: &Path) -> Result<Vec<VoiceRecord>> {
    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_voice_record(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping voice record at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} voice records from {:?}", records.len(), path);
    Ok(records)
}

/// Parse and validate one record
pub fn parse_voice_record(line: &str) -> Result<VoiceRecord> {
    let record: VoiceRecord = serde_json::from_str(line)?;
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bodyweight_record_values() {
        let values = VoiceRecord::reps("Push-ups", 3, 15).values();
        assert_eq!(values.sets, 3);
        assert_eq!(values.reps, "15");
        assert_eq!(values.load, Load::Bodyweight);
    }

    #[test]
    fn test_weighted_and_timed_records() {
        let bench = VoiceRecord::reps("Bench Press", 4, 8).with_weight(62.5);
        assert_eq!(bench.values().load, Load::Kilograms(62.5));

        let plank = parse_voice_record(r#"{"exercise":"Plank","sets":3,"duration_seconds":45}"#)
            .unwrap();
        let values = plank.values();
        assert_eq!(values.duration_seconds, Some(45));
        assert!(values.reps.is_empty());
    }

    #[test]
    fn test_record_without_reps_or_duration_is_invalid() {
        let err = parse_voice_record(r#"{"exercise":"Row","sets":3}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_read_skips_bad_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("voice.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"exercise":"Push-ups","sets":3,"reps":15}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"exercise":"","sets":1,"reps":1}}"#).unwrap();
        writeln!(file, r#"{{"exercise":"Dips","sets":2,"reps":10,"weight_kg":10}}"#).unwrap();
        drop(file);

        let records = read_voice_records(&path).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.exercise.as_str()).collect();
        assert_eq!(names, vec!["Push-ups", "Dips"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = read_voice_records(&temp_dir.path().join("absent.jsonl")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
