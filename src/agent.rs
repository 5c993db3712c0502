//! 单任务记忆协调
//!
//! AgentMemory 把一次任务运行所需的记忆组件串起来，供 Agent 循环在每轮调用：
//! 工作记忆（读/写/命令）、观察压缩、阶段判断与情景文档。
//! MemoryManager 由调用方持有并注入，只在开始与结束任务时使用。

use std::path::PathBuf;

use crate::config::AppConfig;
use crate::core::error::{MemoryError, MemoryResult, ToolError};
use crate::core::phase::{classify, PhaseAdvice};
use crate::memory::{
    ContextCompressor, EpisodicMemory, FailureAdvisory, MemoryManager, ObservationKind,
    StepStatus, WorkingMemory,
};
use crate::tools::ToolOutcome;

/// 工具输出写入观察时保留的最大字符数
const OBSERVATION_CHARS: usize = 500;

pub struct AgentMemory {
    task_id: String,
    episodic: EpisodicMemory,
    working: WorkingMemory,
    compressor: ContextCompressor,
    iteration: usize,
    max_iterations: usize,
}

impl AgentMemory {
    /// 创建任务与情景文档，开始一次任务运行
    pub fn start(memory: &mut MemoryManager, description: &str, cfg: &AppConfig) -> MemoryResult<Self> {
        let (task_id, _) = memory.create_task(description, None)?;
        Self::resume(memory, &task_id, cfg)
    }

    /// 续用已存在的活动任务（工作记忆与观察从空开始）
    pub fn resume(memory: &MemoryManager, task_id: &str, cfg: &AppConfig) -> MemoryResult<Self> {
        let episodic = memory
            .episodic(task_id)
            .ok_or_else(|| MemoryError::TaskNotFound(task_id.to_string()))?;
        episodic.append_log("Task started");
        Ok(Self {
            task_id: task_id.to_string(),
            episodic,
            working: WorkingMemory::new(),
            compressor: ContextCompressor::new(cfg.context.clone()),
            iteration: 0,
            max_iterations: cfg.agent.max_iterations.max(1),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn compressor(&self) -> &ContextCompressor {
        &self.compressor
    }

    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    /// 进入下一轮迭代，返回新的轮次
    pub fn begin_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.compressor.next_iteration();
        self.iteration
    }

    /// 记录文件读取；返回是否首次读取
    pub fn observe_read(&mut self, path: &str) -> bool {
        self.working.record_read(path)
    }

    pub fn observe_write(&mut self, path: &str) {
        self.working.record_write(path);
        self.episodic.update_step(&format!("Write {}", path), StepStatus::Done);
    }

    pub fn observe_command(&mut self, cmd: &str, succeeded: bool, output: &str) -> Option<FailureAdvisory> {
        self.working.record_command(cmd, succeeded);
        let mark = if succeeded { "ok" } else { "failed" };
        self.episodic.append_log(&format!("Command {}: {}", mark, cmd));
        let kind = if succeeded {
            ObservationKind::CommandResult
        } else {
            ObservationKind::Error
        };
        self.compressor.add_observation(
            format!("$ {}\n{}", cmd, preview(output)),
            kind,
            false,
            None,
            succeeded,
        )
    }

    /// 记录一次工具调用结果（含熔断缓存命中）
    pub fn observe_tool(&mut self, tool_name: &str, outcome: &ToolOutcome) -> Option<FailureAdvisory> {
        self.working.increment_tool(tool_name);
        let kind = if outcome.succeeded {
            ObservationKind::ToolResult
        } else {
            ObservationKind::Error
        };
        // 写操作循环提示必须保留在上下文里
        let critical = matches!(outcome.error, Some(ToolError::Loop(_)));
        self.compressor.add_observation(
            preview(&outcome.output),
            kind,
            critical,
            Some(tool_name),
            outcome.succeeded,
        )
    }

    /// 用户拒绝执行某个命令
    pub fn observe_rejection(&mut self, command: &str, reason: &str) {
        self.compressor.add_rejection(command, reason);
        self.episodic.append_log(&format!("Rejected: {}", command));
    }

    pub fn add_finding(&self, finding: &str, category: &str) -> bool {
        self.episodic.add_finding(finding, category)
    }

    /// 判断当前阶段，并同步到工作记忆与情景文档的 Progress 段落
    pub fn guidance(&mut self) -> PhaseAdvice {
        let advice = classify(self.iteration, &self.working, self.max_iterations);
        let progress = format!("{}/{}", self.iteration, self.max_iterations);
        self.working.update_phase(advice.phase.as_str(), progress.as_str());
        self.episodic.update_progress(advice.phase.as_str(), &progress);
        if advice.urgent {
            tracing::warn!(task_id = %self.task_id, phase = %advice.phase, message = %advice.message, "urgent phase guidance");
            if let Some(first) = advice.actions.first() {
                self.episodic.update_next_action(first);
            }
        }
        advice
    }

    /// 拼装注入 Prompt 的记忆上下文：任务文档、工作记忆、观察、阶段建议
    pub fn prompt_context(&self) -> String {
        let advice = classify(self.iteration, &self.working, self.max_iterations);
        let mut s = self.episodic.render_for_prompt(false);
        s.push('\n');
        s.push_str(&self.working.to_prompt_section());
        s.push_str("\n## Observations\n");
        s.push_str(&self.compressor.get_context(None));
        s.push_str("\n\n");
        s.push_str(&advice.to_prompt());
        s
    }

    /// 结束任务：写入总结并完成生命周期迁移，返回文档新位置
    pub fn finish(self, memory: &mut MemoryManager, succeeded: bool, summary: &str) -> MemoryResult<PathBuf> {
        if !summary.trim().is_empty() {
            self.episodic.add_finding(summary, "summary");
        }
        let stats = self.compressor.summary();
        self.episodic.append_log(&format!(
            "Task finished: succeeded={} iterations={} observations={}",
            succeeded, self.iteration, stats.total
        ));
        memory.complete_task(&self.task_id, succeeded)
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}
