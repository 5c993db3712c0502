//! 多 Agent 共享会话记忆
//!
//! 同一 session 的多个 Agent 进程通过 <root>/shared/session_<id>.json 共享发现与进度，
//! 每次读-改-写都在 FileLock 保护下重新加载文件，避免覆盖其它进程的写入。
//! 会话文件损坏时按空会话处理。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::error::MemoryResult;
use crate::core::lock::FileLock;
use crate::memory::episodic::validate_task_id;

/// to_markdown 中展示的最近发现条数
const RECENT_FINDINGS: usize = 10;
/// to_markdown 统计活跃 Agent 的心跳超时
const DEFAULT_AGENT_TIMEOUT_SECS: i64 = 300;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedFinding {
    pub agent_id: String,
    pub category: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub agent_id: String,
    pub status: String,
    #[serde(default)]
    pub details: Option<String>,
    pub updated_at: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Local>,
    pub last_seen: DateTime<Local>,
}

/// 会话文件内容
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SharedSession {
    pub session_id: String,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub findings: Vec<SharedFinding>,
    #[serde(default)]
    pub progress: BTreeMap<String, ProgressEntry>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentInfo>,
}

impl SharedSession {
    fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: Local::now(),
            findings: Vec::new(),
            progress: BTreeMap::new(),
            agents: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct SharedMemory {
    session_id: String,
    agent_id: String,
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SharedMemory {
    pub fn open(
        root: impl AsRef<Path>,
        session_id: &str,
        lock_timeout: Duration,
    ) -> MemoryResult<Self> {
        validate_task_id(session_id)?;
        let dir = root.as_ref().join("shared");
        std::fs::create_dir_all(&dir)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(Self {
            session_id: session_id.to_string(),
            agent_id: format!("agent_{}", &id[..8]),
            path: dir.join(format!("session_{}.json", session_id)),
            lock_path: dir.join(format!("session_{}.lock", session_id)),
            lock_timeout,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_finding(&self, content: &str, category: &str) -> MemoryResult<()> {
        self.modify(|s| {
            s.findings.push(SharedFinding {
                agent_id: self.agent_id.clone(),
                category: category.to_string(),
                content: content.to_string(),
                timestamp: Local::now(),
            });
            true
        })?;
        tracing::info!(agent_id = %self.agent_id, category, "shared finding written");
        Ok(())
    }

    pub fn read_findings(&self, category: Option<&str>) -> Vec<SharedFinding> {
        self.read(|s| {
            s.findings
                .into_iter()
                .filter(|f| category.map_or(true, |c| f.category == c))
                .collect()
        })
    }

    pub fn update_progress(
        &self,
        task_name: &str,
        status: &str,
        details: Option<&str>,
    ) -> MemoryResult<()> {
        self.modify(|s| {
            s.progress.insert(
                task_name.to_string(),
                ProgressEntry {
                    agent_id: self.agent_id.clone(),
                    status: status.to_string(),
                    details: details.map(str::to_string),
                    updated_at: Local::now(),
                },
            );
            true
        })?;
        tracing::info!(agent_id = %self.agent_id, task_name, status, "shared progress updated");
        Ok(())
    }

    /// 指定 task_name 时只返回该条目（不存在则为空）
    pub fn get_progress(&self, task_name: Option<&str>) -> BTreeMap<String, ProgressEntry> {
        self.read(|s| match task_name {
            Some(name) => s.progress.into_iter().filter(|(k, _)| k == name).collect(),
            None => s.progress,
        })
    }

    pub fn register_agent(&self, capabilities: &[&str]) -> MemoryResult<()> {
        let now = Local::now();
        self.modify(|s| {
            s.agents.insert(
                self.agent_id.clone(),
                AgentInfo {
                    capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                    registered_at: now,
                    last_seen: now,
                },
            );
            true
        })?;
        tracing::info!(agent_id = %self.agent_id, "agent registered");
        Ok(())
    }

    /// 刷新心跳；未注册时返回 false
    pub fn heartbeat(&self) -> MemoryResult<bool> {
        self.modify(|s| match s.agents.get_mut(&self.agent_id) {
            Some(info) => {
                info.last_seen = Local::now();
                true
            }
            None => false,
        })
    }

    /// 在 timeout_secs 内有心跳的 Agent
    pub fn active_agents(&self, timeout_secs: i64) -> Vec<String> {
        let cutoff = Local::now() - chrono::Duration::seconds(timeout_secs);
        self.read(|s| {
            s.agents
                .into_iter()
                .filter(|(_, info)| info.last_seen > cutoff)
                .map(|(id, _)| id)
                .collect()
        })
    }

    pub fn to_markdown(&self) -> String {
        let session = self.read(|s| s);
        let cutoff = Local::now() - chrono::Duration::seconds(DEFAULT_AGENT_TIMEOUT_SECS);
        let active = session.agents.values().filter(|a| a.last_seen > cutoff).count();

        let mut out = format!(
            "## Shared Memory (session: {})\n\n**Active agents**: {}\n\n### Shared findings ({})\n\n",
            self.session_id,
            active,
            session.findings.len()
        );
        let skip = session.findings.len().saturating_sub(RECENT_FINDINGS);
        for f in session.findings.iter().skip(skip) {
            out.push_str(&format!("- **[{}]** ({}): {}\n", f.category, f.agent_id, f.content));
        }
        out.push_str("\n### Task progress\n\n");
        for (name, p) in &session.progress {
            out.push_str(&format!("- **{}**: {} ({})\n", name, p.status, p.agent_id));
        }
        out
    }

    /// 加锁读取最新会话
    fn read<T>(&self, f: impl FnOnce(SharedSession) -> T) -> T {
        let lock = FileLock::acquire(&self.lock_path, self.lock_timeout);
        let session = self.load();
        lock.release();
        f(session)
    }

    /// 加锁重新加载 -> 修改 -> 写回；f 返回 false 时不写
    fn modify(&self, f: impl FnOnce(&mut SharedSession) -> bool) -> MemoryResult<bool> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout);
        let mut session = self.load();
        if !f(&mut session) {
            return Ok(false);
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;
        Ok(true)
    }

    fn load(&self) -> SharedSession {
        let Ok(data) = std::fs::read_to_string(&self.path) else {
            return SharedSession::empty(&self.session_id);
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "shared session unreadable, using empty session");
            SharedSession::empty(&self.session_id)
        })
    }
}
