use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use crate::metrics::track_store_operation;
use crate::models::task::TaskSummary;
use crate::models::ProgressSnapshot;

/// Most recent tasks kept per learner; older entries fall off the front.
pub const TASK_HISTORY_LIMIT: usize = 50;

/// Durable learner progress: a bounded task history and two counters.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn add_task_to_history(&self, learner_id: &str, task: TaskSummary) -> Result<()>;

    /// Oldest first.
    async fn history(&self, learner_id: &str) -> Result<Vec<TaskSummary>>;

    async fn clear_history(&self, learner_id: &str) -> Result<()>;

    /// Returns the new solved count.
    async fn increment_solved(&self, learner_id: &str) -> Result<u64>;

    /// Returns the new total of hints used.
    async fn increment_hints_used(&self, learner_id: &str) -> Result<u64>;

    async fn snapshot(&self, learner_id: &str) -> Result<ProgressSnapshot>;

    async fn health_check(&self) -> Result<()>;
}

pub struct RedisProgressStore {
    redis: ConnectionManager,
}

impl RedisProgressStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn history_key(learner_id: &str) -> String {
        format!("sokrates:{}:task_history", learner_id)
    }

    fn solved_key(learner_id: &str) -> String {
        format!("sokrates:{}:solved_tasks", learner_id)
    }

    fn hints_key(learner_id: &str) -> String {
        format!("sokrates:{}:hints_used", learner_id)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let value: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to read counter {}", key))?;
        Ok(value.unwrap_or(0))
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to increment {}", key))
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn add_task_to_history(&self, learner_id: &str, task: TaskSummary) -> Result<()> {
        track_store_operation("add_task_to_history", async {
            let mut conn = self.redis.clone();
            let key = Self::history_key(learner_id);
            let json = serde_json::to_string(&task).context("Failed to serialize task summary")?;

            redis::pipe()
                .atomic()
                .cmd("RPUSH")
                .arg(&key)
                .arg(&json)
                .ignore()
                .cmd("LTRIM")
                .arg(&key)
                .arg(-(TASK_HISTORY_LIMIT as i64))
                .arg(-1)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to append task history")?;

            tracing::debug!("Task {} added to history of {}", task.id, learner_id);
            Ok(())
        })
        .await
    }

    async fn history(&self, learner_id: &str) -> Result<Vec<TaskSummary>> {
        track_store_operation("history", async {
            let mut conn = self.redis.clone();
            let raw: Vec<String> = redis::cmd("LRANGE")
                .arg(Self::history_key(learner_id))
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await
                .context("Failed to read task history")?;

            // a corrupt entry should not hide the rest of the history
            Ok(raw
                .iter()
                .filter_map(|json| match serde_json::from_str::<TaskSummary>(json) {
                    Ok(task) => Some(task),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable history entry for {}: {}", learner_id, e);
                        None
                    }
                })
                .collect())
        })
        .await
    }

    async fn clear_history(&self, learner_id: &str) -> Result<()> {
        track_store_operation("clear_history", async {
            let mut conn = self.redis.clone();
            redis::cmd("DEL")
                .arg(Self::history_key(learner_id))
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to clear task history")?;
            Ok(())
        })
        .await
    }

    async fn increment_solved(&self, learner_id: &str) -> Result<u64> {
        track_store_operation("increment_solved", self.incr(&Self::solved_key(learner_id))).await
    }

    async fn increment_hints_used(&self, learner_id: &str) -> Result<u64> {
        track_store_operation("increment_hints_used", self.incr(&Self::hints_key(learner_id)))
            .await
    }

    async fn snapshot(&self, learner_id: &str) -> Result<ProgressSnapshot> {
        let task_history = self.history(learner_id).await?;
        let solved_tasks = self.counter(&Self::solved_key(learner_id)).await?;
        let total_hints_used = self.counter(&Self::hints_key(learner_id)).await?;

        Ok(ProgressSnapshot {
            learner_id: learner_id.to_string(),
            task_history,
            solved_tasks,
            total_hints_used,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 2s"))??;
        Ok(())
    }
}

#[derive(Default)]
struct LearnerProgress {
    history: VecDeque<TaskSummary>,
    solved_tasks: u64,
    hints_used: u64,
}

/// Process-local store used when no Redis is configured, and in tests.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    learners: Arc<RwLock<HashMap<String, LearnerProgress>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn add_task_to_history(&self, learner_id: &str, task: TaskSummary) -> Result<()> {
        let mut learners = self.learners.write().await;
        let progress = learners.entry(learner_id.to_string()).or_default();
        progress.history.push_back(task);
        while progress.history.len() > TASK_HISTORY_LIMIT {
            progress.history.pop_front();
        }
        Ok(())
    }

    async fn history(&self, learner_id: &str) -> Result<Vec<TaskSummary>> {
        Ok(self
            .learners
            .read()
            .await
            .get(learner_id)
            .map(|p| p.history.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_history(&self, learner_id: &str) -> Result<()> {
        if let Some(progress) = self.learners.write().await.get_mut(learner_id) {
            progress.history.clear();
        }
        Ok(())
    }

    async fn increment_solved(&self, learner_id: &str) -> Result<u64> {
        let mut learners = self.learners.write().await;
        let progress = learners.entry(learner_id.to_string()).or_default();
        progress.solved_tasks += 1;
        Ok(progress.solved_tasks)
    }

    async fn increment_hints_used(&self, learner_id: &str) -> Result<u64> {
        let mut learners = self.learners.write().await;
        let progress = learners.entry(learner_id.to_string()).or_default();
        progress.hints_used += 1;
        Ok(progress.hints_used)
    }

    async fn snapshot(&self, learner_id: &str) -> Result<ProgressSnapshot> {
        let learners = self.learners.read().await;
        let snapshot = match learners.get(learner_id) {
            Some(p) => ProgressSnapshot {
                learner_id: learner_id.to_string(),
                task_history: p.history.iter().cloned().collect(),
                solved_tasks: p.solved_tasks,
                total_hints_used: p.hints_used,
            },
            None => ProgressSnapshot {
                learner_id: learner_id.to_string(),
                ..Default::default()
            },
        };
        Ok(snapshot)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{NewTaskRequest, Task};

    fn summary(content: &str) -> TaskSummary {
        Task::from_request(NewTaskRequest {
            content: content.to_string(),
            image_url: None,
            ocr_text: None,
            answer: None,
            solution: None,
            subject: None,
            difficulty: None,
        })
        .summary()
    }

    #[tokio::test]
    async fn history_keeps_the_most_recent_fifty() {
        let store = InMemoryProgressStore::new();
        for i in 0..=TASK_HISTORY_LIMIT {
            store
                .add_task_to_history("anna", summary(&format!("Zadanie {}", i)))
                .await
                .unwrap();
        }

        let history = store.history("anna").await.unwrap();
        assert_eq!(history.len(), TASK_HISTORY_LIMIT);
        assert_eq!(history[0].content, "Zadanie 1");
        assert_eq!(history.last().unwrap().content, "Zadanie 50");
    }

    #[tokio::test]
    async fn counters_are_per_learner() {
        let store = InMemoryProgressStore::new();
        assert_eq!(store.increment_solved("anna").await.unwrap(), 1);
        assert_eq!(store.increment_solved("anna").await.unwrap(), 2);
        assert_eq!(store.increment_hints_used("bartek").await.unwrap(), 1);

        let anna = store.snapshot("anna").await.unwrap();
        assert_eq!(anna.solved_tasks, 2);
        assert_eq!(anna.total_hints_used, 0);

        let nobody = store.snapshot("nobody").await.unwrap();
        assert_eq!(nobody.learner_id, "nobody");
        assert!(nobody.task_history.is_empty());
    }

    #[tokio::test]
    async fn clearing_history_keeps_counters() {
        let store = InMemoryProgressStore::new();
        store.add_task_to_history("anna", summary("2+2")).await.unwrap();
        store.increment_solved("anna").await.unwrap();

        store.clear_history("anna").await.unwrap();

        let snapshot = store.snapshot("anna").await.unwrap();
        assert!(snapshot.task_history.is_empty());
        assert_eq!(snapshot.solved_tasks, 1);
    }
}
