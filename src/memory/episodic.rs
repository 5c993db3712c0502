//! 情景记忆：单个任务的持久化 Markdown 文档
//!
//! 路径：<root>/tasks/active/task_<id>.md。人类可读可编辑，跨会话保留。
//! 所有修改都是「读取 -> 解析为 TaskDocument -> 改单个段落 -> 整体写回」；
//! 文件不存在时修改操作静默跳过并返回 false。

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::core::error::{MemoryError, MemoryResult};
use crate::memory::document::{Section, TaskDocument};

pub const OBJECTIVE: &str = "Objective";
pub const CHECKLIST: &str = "Checklist";
pub const FINDINGS: &str = "Findings";
pub const PROGRESS: &str = "Progress";
pub const NEXT_ACTION: &str = "Next Action";
pub const LOG: &str = "Log";

/// 初始清单占位项，第一个真实步骤写入时移除
const PLACEHOLDER_STEP: &str = "- [ ] Steps will be identified during execution";
const PLACEHOLDER_FINDING: &str = "_Recorded during execution_";

/// 任务文档所在目录（相对记忆根目录）
pub fn active_dir(root: &Path) -> PathBuf {
    root.join("tasks").join("active")
}

/// 任务 id 只能作为单个文件名片段使用
pub fn validate_task_id(task_id: &str) -> MemoryResult<()> {
    let bad = task_id.is_empty()
        || task_id.contains(['/', '\\', '\0'])
        || task_id.contains("..");
    if bad {
        return Err(MemoryError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}

pub fn task_file_name(task_id: &str) -> String {
    format!("task_{}.md", task_id)
}

/// 清单步骤状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    InProgress,
    Pending,
}

impl StepStatus {
    fn checkbox(&self) -> &'static str {
        match self {
            StepStatus::Done => "- [x]",
            StepStatus::InProgress => "- [ ] (in progress)",
            StepStatus::Pending => "- [ ]",
        }
    }

    /// 解析 "done" / "in_progress" / "pending"，其它值按 pending 处理
    pub fn parse(s: &str) -> Self {
        match s {
            "done" => StepStatus::Done,
            "in_progress" => StepStatus::InProgress,
            _ => StepStatus::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EpisodicMemory {
    task_id: String,
    path: PathBuf,
}

impl EpisodicMemory {
    /// 活动任务的文档：<root>/tasks/active/task_<id>.md
    pub fn new(root: impl AsRef<Path>, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        let path = active_dir(root.as_ref()).join(task_file_name(&task_id));
        Self { task_id, path }
    }

    /// 指定文档路径（如已完成或归档的任务）
    pub fn at(path: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            path: path.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 已存在则原样返回内容，否则按模板创建
    pub fn load_or_create(&self, description: &str) -> std::io::Result<String> {
        if self.path.exists() {
            return std::fs::read_to_string(&self.path);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = self.initial_document(description).render();
        std::fs::write(&self.path, &text)?;
        tracing::debug!(task_id = %self.task_id, path = %self.path.display(), "episodic document created");
        Ok(text)
    }

    fn initial_document(&self, description: &str) -> TaskDocument {
        let description = one_line(description);
        let preamble = vec![
            format!("# Task: {}", description),
            String::new(),
            format!("**Task ID**: {}", self.task_id),
            format!("**Created**: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            "**Status**: in progress".to_string(),
        ];
        let sections = vec![
            Section::with_body(OBJECTIVE, &description),
            Section::with_body(CHECKLIST, PLACEHOLDER_STEP),
            Section::with_body(FINDINGS, PLACEHOLDER_FINDING),
            Section::with_body(PROGRESS, "**Phase**: initialization\n**Progress**: 0/0"),
            Section::with_body(NEXT_ACTION, "Starting task execution"),
            Section::new(LOG),
        ];
        TaskDocument::new(preamble, sections)
    }

    /// 标记步骤状态：已存在同名步骤则原地更新，否则追加
    pub fn update_step(&self, description: &str, status: StepStatus) -> bool {
        let description = one_line(description);
        self.edit(|doc| {
            let Some(section) = doc.section_mut(CHECKLIST) else {
                return false;
            };
            let line = format!("{} {}", status.checkbox(), description);
            section.lines.retain(|l| l != PLACEHOLDER_STEP);
            match section
                .lines
                .iter_mut()
                .find(|l| step_text(l) == Some(description.as_str()))
            {
                Some(existing) => *existing = line,
                None => section.push_line(line),
            }
            true
        })
    }

    pub fn add_finding(&self, finding: &str, category: &str) -> bool {
        let line = format!(
            "- **[{}]** ({}): {}",
            one_line(category),
            Local::now().format("%H:%M:%S"),
            one_line(finding)
        );
        self.edit(|doc| {
            let Some(section) = doc.section_mut(FINDINGS) else {
                return false;
            };
            section.lines.retain(|l| l != PLACEHOLDER_FINDING);
            section.push_line(line);
            true
        })
    }

    pub fn update_progress(&self, phase: &str, progress: &str) -> bool {
        let body = format!("**Phase**: {}\n**Progress**: {}", one_line(phase), one_line(progress));
        self.edit(|doc| doc.replace_section(PROGRESS, &body))
    }

    pub fn update_next_action(&self, action: &str) -> bool {
        let action = one_line(action);
        self.edit(|doc| doc.replace_section(NEXT_ACTION, &action))
    }

    /// 追加一条执行日志（只追加，不改写已有条目）
    pub fn append_log(&self, entry: &str) -> bool {
        let line = format!(
            "[{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            one_line(entry)
        );
        self.edit(|doc| {
            match doc.section_mut(LOG) {
                Some(section) => section.push_line(line),
                None => {
                    let mut section = Section::new(LOG);
                    section.push_line(line);
                    doc.sections.push(section);
                }
            }
            true
        })
    }

    /// 渲染给 Prompt；include_log=false 时省略 Log 段落以节省 token
    pub fn render_for_prompt(&self, include_log: bool) -> String {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return String::new();
        };
        let doc = TaskDocument::parse(&text);
        let body = if include_log {
            doc.render()
        } else {
            doc.render_without(&[LOG])
        };
        format!(
            "## Task Memory\n\n{}\nReminders:\n- Check the Checklist for completed steps\n- Reuse the Findings instead of collecting again\n- Follow the Next Action\n- When the task is complete, finish with a done action and a summary\n",
            body
        )
    }

    /// 读取 -> 修改 -> 写回；文件缺失或修改未生效时不写
    fn edit(&self, f: impl FnOnce(&mut TaskDocument) -> bool) -> bool {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let mut doc = TaskDocument::parse(&text);
        if !f(&mut doc) {
            return false;
        }
        match std::fs::write(&self.path, doc.render()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "episodic document write failed");
                false
            }
        }
    }
}

/// 多行文本压成一行，每个条目只占一行
fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 从清单行中取出步骤描述
fn step_text(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("- [x] ")
        .or_else(|| line.strip_prefix("- [ ] "))?;
    Some(rest.strip_prefix("(in progress) ").unwrap_or(rest))
}
