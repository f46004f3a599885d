//! File-backed store.
//!
//! Layout under the data directory:
//! - `plan.json`: exercises and routines, rewritten atomically on change
//! - `sessions.wal`: JSONL log of session saves and deletes, replayed on read
//!   (last entry per session wins)
//! - `anchors.json`: timer anchors written on suspend
//!
//! Writers take an exclusive lock, readers a shared one. Unreadable
//! documents and log lines are logged and skipped.

use crate::services::{AnchorStore, RestAnchor, Store, TimerAnchors};
use crate::{Error, Exercise, Result, Routine, WorkoutSession};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// The plan tree as persisted
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub routines: Vec<Routine>,
}

/// One line of the session log
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SessionLogEntry {
    Save { session: WorkoutSession },
    Delete { id: Uuid },
}

/// Store keeping everything as files in one directory
#[derive(Clone, Debug)]
pub struct FileStore {
    plan_path: PathBuf,
    log_path: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            plan_path: data_dir.join("plan.json"),
            log_path: data_dir.join("sessions.wal"),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn load_plan(&self) -> PlanDocument {
        load_document(&self.plan_path)
    }

    fn update_plan<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut PlanDocument),
    {
        set_aside_if_unreadable::<PlanDocument>(&self.plan_path)?;
        let mut plan = self.load_plan();
        f(&mut plan);
        save_document(&self.plan_path, &plan)
    }

    fn append(&self, entry: &SessionLogEntry) -> Result<()> {
        ensure_parent_dir(&self.log_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;
        Ok(())
    }

    /// Replay the session log into the live set of sessions
    fn replay(&self) -> Result<HashMap<Uuid, WorkoutSession>> {
        let mut sessions = HashMap::new();
        if !self.log_path.exists() {
            return Ok(sessions);
        }

        let file = File::open(&self.log_path)?;
        file.lock_shared()?;

        let reader = BufReader::new(&file);
        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<SessionLogEntry>(&line) {
                Ok(SessionLogEntry::Save { session }) => {
                    sessions.insert(session.id, session);
                }
                Ok(SessionLogEntry::Delete { id }) => {
                    sessions.remove(&id);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse session log line {}: {}", line_num + 1, e);
                }
            }
        }

        file.unlock()?;
        Ok(sessions)
    }

    /// Rewrite the session log with one entry per live session
    ///
    /// Returns the number of sessions kept.
    pub fn compact(&self) -> Result<usize> {
        let sessions = self.sessions()?;
        ensure_parent_dir(&self.log_path)?;
        let parent = self
            .log_path
            .parent()
            .ok_or_else(|| Error::Persistence("session log path missing parent".into()))?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            for session in sessions.iter().rev() {
                let entry = SessionLogEntry::Save {
                    session: session.clone(),
                };
                writer.write_all(serde_json::to_string(&entry)?.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.log_path).map_err(|e| Error::Io(e.error))?;

        tracing::info!("Compacted session log to {} sessions", sessions.len());
        Ok(sessions.len())
    }
}

impl Store for FileStore {
    fn save_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        self.update_plan(|plan| upsert_by(&mut plan.exercises, exercise, |e| e.id))
    }

    fn delete_exercise(&mut self, id: Uuid) -> Result<()> {
        self.update_plan(|plan| plan.exercises.retain(|e| e.id != id))
    }

    fn exercises(&self) -> Result<Vec<Exercise>> {
        let mut exercises = self.load_plan().exercises;
        exercises.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(exercises)
    }

    fn save_routine(&mut self, routine: &Routine) -> Result<()> {
        self.update_plan(|plan| upsert_by(&mut plan.routines, routine, |r| r.id))
    }

    fn delete_routine(&mut self, id: Uuid) -> Result<()> {
        self.update_plan(|plan| plan.routines.retain(|r| r.id != id))
    }

    fn routines(&self) -> Result<Vec<Routine>> {
        Ok(self.load_plan().routines)
    }

    fn save_session(&mut self, session: &WorkoutSession) -> Result<()> {
        self.append(&SessionLogEntry::Save {
            session: session.clone(),
        })?;
        tracing::debug!("Logged session {}", session.id);
        Ok(())
    }

    fn delete_session(&mut self, id: Uuid) -> Result<()> {
        self.append(&SessionLogEntry::Delete { id })?;
        tracing::debug!("Logged deletion of session {}", id);
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<WorkoutSession>> {
        let mut sessions: Vec<_> = self.replay()?.into_values().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }
}

/// Timer anchors kept in a small JSON document
#[derive(Clone, Debug)]
pub struct FileAnchorStore {
    path: PathBuf,
}

impl FileAnchorStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("anchors.json"),
        }
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TimerAnchors),
    {
        let mut anchors: TimerAnchors = load_document(&self.path);
        f(&mut anchors);
        save_document(&self.path, &anchors)
    }
}

impl AnchorStore for FileAnchorStore {
    fn read(&self) -> Result<TimerAnchors> {
        Ok(load_document(&self.path))
    }

    fn write_workout_start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.update(|a| a.workout_started_at = Some(at))
    }

    fn write_rest(&mut self, anchor: RestAnchor) -> Result<()> {
        self.update(|a| a.rest = Some(anchor))
    }

    fn clear_workout_start(&mut self) -> Result<()> {
        self.update(|a| a.workout_started_at = None)
    }

    fn clear_rest(&mut self) -> Result<()> {
        self.update(|a| a.rest = None)
    }
}

fn upsert_by<T: Clone>(items: &mut Vec<T>, item: &T, key: impl Fn(&T) -> Uuid) {
    let id = key(item);
    match items.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Load a JSON document with a shared lock, falling back to defaults
fn load_document<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Unable to open {:?}: {}. Using defaults.", path, e);
            return T::default();
        }
    };

    if let Err(e) = file.lock_shared() {
        tracing::warn!("Unable to lock {:?}: {}. Using defaults.", path, e);
        return T::default();
    }

    let mut contents = String::new();
    let read = BufReader::new(&file).read_to_string(&mut contents);
    let _ = file.unlock();
    if let Err(e) = read {
        tracing::warn!("Failed to read {:?}: {}. Using defaults.", path, e);
        return T::default();
    }

    match serde_json::from_str(&contents) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!("Failed to parse {:?}: {}. Using defaults.", path, e);
            T::default()
        }
    }
}

/// Move a document that no longer parses to `<name>.corrupt`
///
/// Keeps the damaged bytes around instead of letting the next write
/// replace them with defaults.
fn set_aside_if_unreadable<T: DeserializeOwned>(path: &Path) -> Result<()> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if serde_json::from_str::<T>(&contents).is_ok() {
        return Ok(());
    }

    let mut corrupt = path.as_os_str().to_owned();
    corrupt.push(".corrupt");
    let corrupt = PathBuf::from(corrupt);
    std::fs::rename(path, &corrupt)?;
    tracing::warn!("Moved unreadable {:?} to {:?}", path, corrupt);
    Ok(())
}

/// Atomically replace a JSON document (temp file + rename)
fn save_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let parent = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("{:?} has no parent directory", path)))?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        writer.write_all(serde_json::to_string(document)?.as_bytes())?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Saved {:?}", path);
    Ok(())
}
