//! Hot memory tier
//!
//! Always-loaded in-process struct: identity, owner profile, a small
//! active-context window, and the lessons an agent must never forget.
//! Every mutating op bumps `version`/`updated_at` then enforces the
//! 5,120-byte serialized cap by progressive pruning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::HotConfig;
use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub text: String,
    pub importance: f64,
    pub learned_at: DateTime<Utc>,
}

/// Identity + owner profile + bounded active context + critical lessons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotMemory {
    pub agent_id: String,
    pub agent_name: String,
    pub owner_name: String,
    pub owner_preferences: Vec<String>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub projects: Vec<Project>,
    pub recent_events: VecDeque<Event>,
    pub pending_tasks: VecDeque<PendingTask>,
    pub lessons: Vec<Lesson>,

    #[serde(skip)]
    max_projects: usize,
    #[serde(skip)]
    max_recent_events: usize,
    #[serde(skip)]
    max_pending_tasks: usize,
    #[serde(skip)]
    max_lessons: usize,
    #[serde(skip)]
    max_serialized_bytes: usize,
}

impl HotMemory {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>, owner_name: impl Into<String>, config: &HotConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            owner_name: owner_name.into(),
            owner_preferences: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
            projects: Vec::new(),
            recent_events: VecDeque::new(),
            pending_tasks: VecDeque::new(),
            lessons: Vec::new(),
            max_projects: config.max_projects,
            max_recent_events: config.max_recent_events,
            max_pending_tasks: config.max_pending_tasks,
            max_lessons: config.max_lessons,
            max_serialized_bytes: config.max_serialized_bytes,
        }
    }

    /// Re-attaches the size caps after deserializing a persisted snapshot
    /// (caps are `#[serde(skip)]` since they belong to config, not state).
    pub fn with_config(mut self, config: &HotConfig) -> Self {
        self.max_projects = config.max_projects;
        self.max_recent_events = config.max_recent_events;
        self.max_pending_tasks = config.max_pending_tasks;
        self.max_lessons = config.max_lessons;
        self.max_serialized_bytes = config.max_serialized_bytes;
        self
    }

    pub fn update_identity(&mut self, agent_name: impl Into<String>) -> Result<()> {
        self.agent_name = agent_name.into();
        self.touch_and_enforce()
    }

    pub fn update_owner_profile(&mut self, owner_name: impl Into<String>) -> Result<()> {
        self.owner_name = owner_name.into();
        self.touch_and_enforce()
    }

    pub fn add_preference(&mut self, preference: impl Into<String>) -> Result<()> {
        self.owner_preferences.push(preference.into());
        self.touch_and_enforce()
    }

    pub fn add_project(&mut self, project: Project) -> Result<()> {
        self.projects.push(project);
        if self.projects.len() > self.max_projects {
            self.projects.remove(0);
        }
        self.touch_and_enforce()
    }

    pub fn add_event(&mut self, event: Event) -> Result<()> {
        self.recent_events.push_back(event);
        while self.recent_events.len() > self.max_recent_events {
            self.recent_events.pop_front();
        }
        self.touch_and_enforce()
    }

    pub fn add_task(&mut self, task: PendingTask) -> Result<()> {
        self.pending_tasks.push_back(task);
        while self.pending_tasks.len() > self.max_pending_tasks {
            self.pending_tasks.pop_front();
        }
        self.touch_and_enforce()
    }

    pub fn add_lesson(&mut self, lesson: Lesson) -> Result<()> {
        self.lessons.push(lesson);
        while self.lessons.len() > self.max_lessons {
            self.remove_least_important_lesson();
        }
        self.touch_and_enforce()
    }

    fn touch_and_enforce(&mut self) -> Result<()> {
        self.version += 1;
        self.updated_at = Utc::now();
        self.enforce_size()
    }

    fn serialized_len(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)
            .map_err(|e| FleetError::Internal(e.into()))?
            .len())
    }

    fn remove_least_important_lesson(&mut self) -> bool {
        if self.lessons.is_empty() {
            return false;
        }
        let (idx, _) = self
            .lessons
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.importance.partial_cmp(&b.importance).unwrap())
            .expect("non-empty lessons");
        self.lessons.remove(idx);
        true
    }

    /// Progressively prunes lowest-importance lesson, then oldest events,
    /// then oldest pending tasks, until under cap or exhausted.
    fn enforce_size(&mut self) -> Result<()> {
        if self.serialized_len()? <= self.max_serialized_bytes {
            return Ok(());
        }

        while self.serialized_len()? > self.max_serialized_bytes && !self.lessons.is_empty() {
            self.remove_least_important_lesson();
        }
        while self.serialized_len()? > self.max_serialized_bytes && !self.recent_events.is_empty() {
            self.recent_events.pop_front();
        }
        while self.serialized_len()? > self.max_serialized_bytes && !self.pending_tasks.is_empty() {
            self.pending_tasks.pop_front();
        }

        if self.serialized_len()? > self.max_serialized_bytes {
            return Err(FleetError::Capacity(format!(
                "hot memory still exceeds {} bytes after full pruning",
                self.max_serialized_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> HotMemory {
        HotMemory::new("agent-1", "claw", "ada", &HotConfig::default())
    }

    #[test]
    fn mutating_ops_bump_version_and_timestamp() {
        let mut hot = fresh();
        let before = hot.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        hot.add_preference("prefers terse replies").unwrap();
        assert_eq!(hot.version, 1);
        assert!(hot.updated_at >= before);
    }

    #[test]
    fn recent_events_cap_at_ten() {
        let mut hot = fresh();
        for i in 0..15 {
            hot.add_event(Event {
                description: format!("event {i}"),
                occurred_at: Utc::now(),
            })
            .unwrap();
        }
        assert_eq!(hot.recent_events.len(), 10);
        assert_eq!(hot.recent_events.front().unwrap().description, "event 5");
    }

    #[test]
    fn enforce_size_prunes_lowest_importance_lesson_first() {
        let mut config = HotConfig::default();
        config.max_serialized_bytes = 700;
        let mut hot = HotMemory::new("agent-1", "claw", "ada", &config);

        hot.lessons.push(Lesson {
            text: "keep important long lesson padded out to be large enough to force a prune pass".to_string(),
            importance: 0.9,
            learned_at: Utc::now(),
        });
        hot.add_lesson(Lesson {
            text: "drop this one first because importance is lowest of the set".to_string(),
            importance: 0.1,
            learned_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(hot.lessons.len(), 1);
        assert!((hot.lessons[0].importance - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn exhausting_all_prunable_state_fails_loudly() {
        let mut config = HotConfig::default();
        config.max_serialized_bytes = 10;
        let mut hot = HotMemory::new("agent-1", "claw", "ada", &config);
        let err = hot.add_preference("x").unwrap_err();
        assert!(matches!(err, FleetError::Capacity(_)));
    }
}
