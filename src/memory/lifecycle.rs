//! 任务记忆生命周期
//!
//! create -> tasks/active/ -> tasks/completed/ -> tasks/archived/<YYYY-MM>/
//!
//! 元数据索引 .metadata.json 记录每个任务的状态与文档位置；任一时刻文档只存在于一个目录，
//! file_path 始终与之对应。失败任务的文档同样放在 completed/，由状态区分，
//! 且只有 cleanup 会在保留期过后删除失败任务。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

use crate::core::error::{MemoryError, MemoryResult};
use crate::memory::episodic::{task_file_name, validate_task_id, EpisodicMemory};
use crate::memory::search::{SimilarTask, TaskSearch};

const METADATA_FILE: &str = ".metadata.json";
/// 描述最多保存的字符数
const DESCRIPTION_LIMIT: usize = 100;
/// 失败任务保留天数
const FAILED_RETENTION_DAYS: i64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Completed,
    Failed,
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// 索引中的一条任务记录；id 即索引键，不单独序列化
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(skip)]
    pub id: String,
    pub status: TaskStatus,
    pub description: String,
    pub created_at: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Local>>,
    /// 相对记忆根目录的文档路径
    pub file_path: String,
}

/// 保留策略，随元数据一起持久化
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// 已完成任务保留天数，超过后归档
    pub retention_days: i64,
    pub auto_archive: bool,
    pub auto_cleanup: bool,
    /// 活动任务软上限：超过只告警
    pub max_active_tasks: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 7,
            auto_archive: true,
            auto_cleanup: true,
            max_active_tasks: 10,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub config: RetentionPolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub archived: usize,
    pub purged: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub archived: usize,
}

/// 任务记忆管理器：每个进程显式创建一个并注入使用
#[derive(Debug)]
pub struct MemoryManager {
    root: PathBuf,
    index: MetadataIndex,
}

impl MemoryManager {
    /// 打开记忆根目录；不存在则创建目录结构。元数据损坏时以空索引启动
    pub fn open(root: impl AsRef<Path>) -> MemoryResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in ["active", "completed", "archived"] {
            std::fs::create_dir_all(root.join("tasks").join(dir))?;
        }
        let index = load_index(&root.join(METADATA_FILE));
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.index.config
    }

    /// 替换保留策略并持久化
    pub fn set_policy(&mut self, policy: RetentionPolicy) -> MemoryResult<()> {
        self.index.config = policy;
        self.save()
    }

    /// 创建任务并写入初始文档，返回 (id, 文档绝对路径)。
    /// 未指定 id 时按时间戳生成，冲突时追加后缀；指定的 id 已是活动任务时直接续用
    pub fn create_task(
        &mut self,
        description: &str,
        id: Option<&str>,
    ) -> MemoryResult<(String, PathBuf)> {
        let id = match id {
            Some(id) => {
                validate_task_id(id)?;
                if let Some(existing) = self.index.tasks.get(id) {
                    if existing.status != TaskStatus::Active {
                        return Err(MemoryError::InvalidTransition {
                            id: id.to_string(),
                            from: existing.status,
                            to: TaskStatus::Active,
                        });
                    }
                    tracing::info!(task_id = %id, "resuming active task");
                    return Ok((id.to_string(), self.root.join(&existing.file_path)));
                }
                id.to_string()
            }
            None => self.fresh_id(),
        };

        let active = self.index.tasks.values().filter(|t| t.status == TaskStatus::Active).count();
        if active >= self.index.config.max_active_tasks {
            tracing::warn!(
                active,
                max = self.index.config.max_active_tasks,
                "active task limit exceeded"
            );
        }

        let file_path = format!("tasks/active/{}", task_file_name(&id));
        let record = TaskRecord {
            id: id.clone(),
            status: TaskStatus::Active,
            description: description.chars().take(DESCRIPTION_LIMIT).collect(),
            created_at: Local::now(),
            completed_at: None,
            archived_at: None,
            file_path: file_path.clone(),
        };
        self.index.tasks.insert(id.clone(), record);
        self.save()?;

        let path = self.root.join(&file_path);
        EpisodicMemory::at(&path, id.as_str()).load_or_create(description)?;
        tracing::info!(task_id = %id, "task created");
        Ok((id, path))
    }

    fn fresh_id(&self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let taken = |id: &str| {
            self.index.tasks.contains_key(id)
                || self.root.join("tasks/active").join(task_file_name(id)).exists()
        };
        if !taken(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// 完成任务：文档移入 completed/ 并在头部加上完成标记
    pub fn complete_task(&mut self, id: &str, succeeded: bool) -> MemoryResult<PathBuf> {
        let to = if succeeded {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let record = self
            .index
            .tasks
            .get(id)
            .ok_or_else(|| MemoryError::TaskNotFound(id.to_string()))?;
        if record.status != TaskStatus::Active {
            return Err(MemoryError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to,
            });
        }

        let now = Local::now();
        let src = self.root.join(&record.file_path);
        let rel = format!("tasks/completed/{}", task_file_name(id));
        let dst = self.root.join(&rel);
        if src.exists() {
            // 先在原位置写入完成标记再移动；rename 失败时索引与文档仍一致
            let content = std::fs::read_to_string(&src)?;
            let header = format!(
                "<!-- COMPLETED: {} -->\n<!-- SUCCESS: {} -->\n\n",
                now.to_rfc3339(),
                succeeded
            );
            std::fs::write(&src, header + strip_completion_header(&content))?;
            std::fs::rename(&src, &dst)?;
        } else {
            tracing::warn!(task_id = %id, path = %src.display(), "task document missing on completion");
        }

        if let Some(record) = self.index.tasks.get_mut(id) {
            record.status = to;
            record.completed_at = Some(now);
            record.file_path = rel;
        }
        self.save()?;
        tracing::info!(task_id = %id, status = %to, "task completed");
        Ok(dst)
    }

    /// 归档完成时间早于 days 天前的已完成任务，返回归档数量。失败任务不归档
    pub fn archive_older_than(&mut self, days: i64) -> MemoryResult<usize> {
        let cutoff = Local::now() - Duration::days(days);
        let due: Vec<(String, DateTime<Local>)> = self
            .index
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.completed_at.map(|at| (t.id.clone(), at)))
            .filter(|(_, at)| *at <= cutoff)
            .collect();

        let mut archived = 0;
        let mut outcome = Ok(());
        for (id, completed_at) in due {
            match self.archive_one(&id, completed_at) {
                Ok(true) => archived += 1,
                Ok(false) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        // 出错时也先落盘已移动的任务
        if archived > 0 {
            self.save()?;
        }
        outcome.map(|()| archived)
    }

    /// 移动单个任务到归档目录并更新索引记录；文档缺失时跳过
    fn archive_one(&mut self, id: &str, completed_at: DateTime<Local>) -> MemoryResult<bool> {
        let Some(record) = self.index.tasks.get(id) else {
            return Ok(false);
        };
        let src = self.root.join(&record.file_path);
        if !src.exists() {
            tracing::warn!(task_id = %id, path = %src.display(), "completed document missing, skip archive");
            return Ok(false);
        }
        let month = completed_at.format("%Y-%m").to_string();
        let month_dir = self.root.join("tasks/archived").join(&month);
        std::fs::create_dir_all(&month_dir)?;
        std::fs::rename(&src, month_dir.join(task_file_name(id)))?;

        if let Some(record) = self.index.tasks.get_mut(id) {
            record.status = TaskStatus::Archived;
            record.archived_at = Some(Local::now());
            record.file_path = format!("tasks/archived/{}/{}", month, task_file_name(id));
        }
        tracing::info!(task_id = %id, month = %month, "task archived");
        Ok(true)
    }

    /// 按策略执行归档与失败任务清理
    pub fn cleanup(&mut self) -> MemoryResult<CleanupReport> {
        let mut report = CleanupReport::default();
        if self.index.config.auto_archive {
            report.archived = self.archive_older_than(self.index.config.retention_days)?;
        }
        if self.index.config.auto_cleanup {
            report.purged = self.purge_failed()?;
        }
        tracing::info!(archived = report.archived, purged = report.purged, "memory cleanup done");
        Ok(report)
    }

    fn purge_failed(&mut self) -> MemoryResult<usize> {
        let cutoff = Local::now() - Duration::days(FAILED_RETENTION_DAYS);
        let expired: Vec<String> = self
            .index
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .filter(|t| t.completed_at.is_some_and(|at| at < cutoff))
            .map(|t| t.id.clone())
            .collect();

        let mut purged = 0;
        let mut outcome = Ok(());
        for id in &expired {
            let Some(record) = self.index.tasks.get(id) else {
                continue;
            };
            let path = self.root.join(&record.file_path);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    outcome = Err(MemoryError::from(e));
                    break;
                }
            }
            self.index.tasks.remove(id);
            purged += 1;
            tracing::info!(task_id = %id, "failed task purged");
        }
        if purged > 0 {
            self.save()?;
        }
        outcome.map(|()| purged)
    }

    /// 列出任务，按创建时间倒序
    pub fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self
            .index
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        tasks
    }

    /// 描述子串匹配（不区分大小写）
    pub fn search_tasks(&self, query: &str) -> Vec<TaskRecord> {
        let q = query.to_lowercase();
        self.index
            .tasks
            .values()
            .filter(|t| t.description.to_lowercase().contains(&q))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            total: self.index.tasks.len(),
            ..Default::default()
        };
        for t in self.index.tasks.values() {
            match t.status {
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Archived => stats.archived += 1,
            }
        }
        stats
    }

    pub fn get_task(&self, id: &str) -> Option<&TaskRecord> {
        self.index.tasks.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.index.tasks.values()
    }

    /// 任务文档的当前绝对路径
    pub fn task_path(&self, id: &str) -> Option<PathBuf> {
        self.index.tasks.get(id).map(|t| self.root.join(&t.file_path))
    }

    /// 任务当前位置上的情景记忆
    pub fn episodic(&self, id: &str) -> Option<EpisodicMemory> {
        self.task_path(id).map(|p| EpisodicMemory::at(p, id))
    }

    /// 相似任务检索；检索失败时记录告警并返回空
    pub fn find_similar(&self, search: &dyn TaskSearch, query: &str, k: usize) -> Vec<SimilarTask> {
        match search.similar(query, k) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "similar task search failed");
                Vec::new()
            }
        }
    }

    fn save(&self) -> MemoryResult<()> {
        let json = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(self.root.join(METADATA_FILE), json)?;
        Ok(())
    }
}

/// 去掉已有的完成标记，重试完成时不会叠加
fn strip_completion_header(content: &str) -> &str {
    let mut rest = content;
    for marker in ["<!-- COMPLETED: ", "<!-- SUCCESS: "] {
        if rest.starts_with(marker) {
            rest = rest.split_once('\n').map_or("", |(_, tail)| tail);
        }
    }
    rest.trim_start_matches('\n')
}

fn load_index(path: &Path) -> MetadataIndex {
    let Ok(data) = std::fs::read_to_string(path) else {
        return MetadataIndex::default();
    };
    match serde_json::from_str::<MetadataIndex>(&data) {
        Ok(mut index) => {
            for (id, record) in index.tasks.iter_mut() {
                record.id = id.clone();
            }
            index
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "metadata corrupted, starting with empty index");
            MetadataIndex::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::search::KeywordTaskSearch;
    use tempfile::TempDir;

    fn backdate(mgr: &mut MemoryManager, id: &str, days: i64) {
        let record = mgr.index.tasks.get_mut(id).unwrap();
        record.created_at = record.created_at - Duration::days(days);
        record.completed_at = record.completed_at.map(|at| at - Duration::days(days));
    }

    /// 文档恰好存在于 file_path 指向的目录
    fn assert_single_location(mgr: &MemoryManager, id: &str) {
        let name = task_file_name(id);
        let mut found = Vec::new();
        for entry in ["tasks/active", "tasks/completed"] {
            let p = mgr.root().join(entry).join(&name);
            if p.exists() {
                found.push(p);
            }
        }
        let archived = mgr.root().join("tasks/archived");
        for month in std::fs::read_dir(&archived).unwrap() {
            let p = month.unwrap().path().join(&name);
            if p.exists() {
                found.push(p);
            }
        }
        assert_eq!(found, vec![mgr.task_path(id).unwrap()]);
    }

    #[test]
    fn test_create_writes_document_and_index() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        let (id, path) = mgr.create_task("analyze the repo", Some("T1")).unwrap();
        assert_eq!(id, "T1");
        assert!(path.ends_with("tasks/active/task_T1.md"));
        assert!(path.exists());

        let reopened = MemoryManager::open(dir.path()).unwrap();
        let record = reopened.get_task("T1").unwrap();
        assert_eq!(record.id, "T1");
        assert_eq!(record.status, TaskStatus::Active);
        assert_eq!(record.file_path, "tasks/active/task_T1.md");
    }

    #[test]
    fn test_default_ids_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        let (a, _) = mgr.create_task("a", None).unwrap();
        let (b, _) = mgr.create_task("b", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(mgr.stats().active, 2);
    }

    #[test]
    fn test_description_truncated() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        let long = "x".repeat(250);
        mgr.create_task(&long, Some("L")).unwrap();
        assert_eq!(mgr.get_task("L").unwrap().description.len(), 100);
    }

    #[test]
    fn test_complete_moves_and_marks() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.create_task("t", Some("T1")).unwrap();
        let path = mgr.complete_task("T1", true).unwrap();
        assert!(path.ends_with("tasks/completed/task_T1.md"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("<!-- COMPLETED: "));
        assert!(text.contains("<!-- SUCCESS: true -->"));
        assert_single_location(&mgr, "T1");

        let err = mgr.complete_task("T1", true).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidTransition { .. }));
        assert!(matches!(
            mgr.complete_task("nope", true),
            Err(MemoryError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_archive_moves_by_completion_month() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.create_task("old", Some("T1")).unwrap();
        mgr.complete_task("T1", true).unwrap();
        backdate(&mut mgr, "T1", 8);
        mgr.create_task("recent", Some("T2")).unwrap();
        mgr.complete_task("T2", true).unwrap();

        assert_eq!(mgr.archive_older_than(7).unwrap(), 1);
        let record = mgr.get_task("T1").unwrap();
        assert_eq!(record.status, TaskStatus::Archived);
        let month = record.completed_at.unwrap().format("%Y-%m").to_string();
        assert_eq!(record.file_path, format!("tasks/archived/{}/task_T1.md", month));
        assert_single_location(&mgr, "T1");
        assert_eq!(mgr.get_task("T2").unwrap().status, TaskStatus::Completed);

        let err = mgr.complete_task("T1", true).unwrap_err();
        assert!(err.to_string().contains("archived -> completed"));
    }

    #[test]
    fn test_failed_archive_keeps_index_in_sync() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        for id in ["A", "B"] {
            mgr.create_task(id, Some(id)).unwrap();
            mgr.complete_task(id, true).unwrap();
        }
        // B 的归档目标被同名非空目录占住，rename 必然失败
        let month = mgr.get_task("B").unwrap().completed_at.unwrap().format("%Y-%m").to_string();
        let blocker = dir.path().join("tasks/archived").join(&month).join("task_B.md");
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        assert!(mgr.archive_older_than(0).is_err());

        let reopened = MemoryManager::open(dir.path()).unwrap();
        let a = reopened.get_task("A").unwrap();
        assert_eq!(a.status, TaskStatus::Archived);
        assert!(reopened.task_path("A").unwrap().exists());
        let b = reopened.get_task("B").unwrap();
        assert_eq!(b.status, TaskStatus::Completed);
        assert!(reopened.task_path("B").unwrap().is_file());
    }

    #[test]
    fn test_complete_retry_after_failed_move() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.create_task("t", Some("C")).unwrap();
        let blocker = dir.path().join("tasks/completed/task_C.md");
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        assert!(mgr.complete_task("C", true).is_err());
        assert_eq!(mgr.get_task("C").unwrap().status, TaskStatus::Active);
        assert!(mgr.task_path("C").unwrap().is_file());

        std::fs::remove_dir_all(&blocker).unwrap();
        let path = mgr.complete_task("C", false).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("<!-- COMPLETED: ").count(), 1);
        assert!(text.contains("<!-- SUCCESS: false -->"));
        assert_single_location(&mgr, "C");
    }

    #[test]
    fn test_ids_with_path_segments_rejected() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        for id in ["../escape", "a/b", "a\\b", ""] {
            assert!(matches!(
                mgr.create_task("x", Some(id)),
                Err(MemoryError::InvalidTaskId(_))
            ));
        }
        assert_eq!(mgr.stats().total, 0);
        assert!(!dir.path().join("tasks/escape.md").exists());
    }

    #[test]
    fn test_cleanup_purges_only_expired_failed() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.create_task("f1", Some("F1")).unwrap();
        mgr.complete_task("F1", false).unwrap();
        backdate(&mut mgr, "F1", 2);
        mgr.create_task("f2", Some("F2")).unwrap();
        mgr.complete_task("F2", false).unwrap();

        let f1_path = mgr.task_path("F1").unwrap();
        assert!(f1_path.starts_with(dir.path().join("tasks/completed")));
        let report = mgr.cleanup().unwrap();
        assert_eq!(report, CleanupReport { archived: 0, purged: 1 });
        assert!(mgr.get_task("F1").is_none());
        assert!(!f1_path.exists());
        assert_eq!(mgr.get_task("F2").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_corrupt_metadata_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "{ not json").unwrap();
        let mgr = MemoryManager::open(dir.path()).unwrap();
        assert_eq!(mgr.stats().total, 0);
        assert_eq!(mgr.policy(), &RetentionPolicy::default());
    }

    #[test]
    fn test_list_search_and_similar() {
        let dir = TempDir::new().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.create_task("Fix login bug", Some("A")).unwrap();
        mgr.create_task("write release notes", Some("B")).unwrap();
        backdate(&mut mgr, "A", 1);
        mgr.complete_task("B", true).unwrap();

        let all = mgr.list_tasks(None, 10);
        assert_eq!(all[0].id, "B");
        assert_eq!(mgr.list_tasks(Some(TaskStatus::Active), 10).len(), 1);
        assert_eq!(mgr.list_tasks(None, 1).len(), 1);
        assert_eq!(mgr.search_tasks("LOGIN")[0].id, "A");

        let search = KeywordTaskSearch::from_records(mgr.records());
        let hits = mgr.find_similar(&search, "login bug", 3);
        assert_eq!(hits[0].task_id, "A");
    }

    struct FailingSearch;

    impl TaskSearch for FailingSearch {
        fn similar(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<SimilarTask>> {
            anyhow::bail!("embedding service down")
        }
    }

    #[test]
    fn test_similar_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let mgr = MemoryManager::open(dir.path()).unwrap();
        assert!(mgr.find_similar(&FailingSearch, "x", 3).is_empty());
    }
}
