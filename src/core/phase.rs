//! 任务阶段分类
//!
//! 根据工作记忆与迭代次数判断当前阶段，并给出固定的行动建议（由 Prompt 层原样注入）。
//! 无状态：同样的输入总是得到同样的结果。

use serde::Serialize;

use crate::memory::WorkingMemory;

/// 读取文件超过该数量且未写入任何文件时，强制进入分析
const OVERLOAD_READS: usize = 15;
/// 少于该读取数且未执行命令时视为收集阶段
const GATHER_READS: usize = 5;

/// Agent 当前所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Gather,
    Analyze,
    Execute,
    Finalize,
    Stuck,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Gather => "gather",
            TaskPhase::Analyze => "analyze",
            TaskPhase::Execute => "execute",
            TaskPhase::Finalize => "finalize",
            TaskPhase::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段判断结果
#[derive(Clone, Debug, Serialize)]
pub struct PhaseAdvice {
    pub phase: TaskPhase,
    pub message: String,
    pub actions: Vec<&'static str>,
    pub urgent: bool,
}

const STUCK_ACTIONS: &[&str] = &[
    "Stop the current operation immediately",
    "Summarize an answer from the information already collected",
    "Finish with a done action and a summary",
    "Do not attempt more reads or commands",
];

const OVERLOAD_ACTIONS: &[&str] = &[
    "Do not read new files",
    "Analyze the information already collected",
    "Extract the key findings",
    "Prepare a conclusion",
];

const FINALIZE_ACTIONS: &[&str] = &[
    "Give the answer now based on existing information",
    "Do not start new subtasks",
    "Finish with a done action and a summary",
];

const GATHER_ACTIONS: &[&str] = &[
    "Continue collecting necessary information",
    "Read the relevant files",
    "Explore the project structure",
];

const ANALYZE_ACTIONS: &[&str] = &[
    "Analyze the collected data",
    "Extract the key information",
    "Prepare to execute or conclude",
];

const EXECUTE_ACTIONS: &[&str] = &["Continue executing the task"];

/// 按固定优先级判断阶段，先命中者生效
pub fn classify(iteration: usize, memory: &WorkingMemory, max_iterations: usize) -> PhaseAdvice {
    if let Some(reason) = memory.detect_loop() {
        return advice(TaskPhase::Stuck, format!("Loop detected: {}", reason), STUCK_ACTIONS, true);
    }

    let reads = memory.files_read().len();
    if reads > OVERLOAD_READS && memory.files_written().is_empty() {
        return advice(
            TaskPhase::Analyze,
            "Enough information gathered, switch to analysis".to_string(),
            OVERLOAD_ACTIONS,
            false,
        );
    }

    // iteration >= 0.8 * max_iterations
    if iteration * 5 >= max_iterations * 4 {
        return advice(
            TaskPhase::Finalize,
            format!(
                "Approaching iteration limit ({}/{}), wrap up now",
                iteration, max_iterations
            ),
            FINALIZE_ACTIONS,
            true,
        );
    }

    if reads < GATHER_READS && memory.commands_run().is_empty() {
        return advice(
            TaskPhase::Gather,
            "Information gathering phase".to_string(),
            GATHER_ACTIONS,
            false,
        );
    }

    if reads >= GATHER_READS {
        return advice(TaskPhase::Analyze, "Analysis phase".to_string(), ANALYZE_ACTIONS, false);
    }

    advice(TaskPhase::Execute, "Execution phase".to_string(), EXECUTE_ACTIONS, false)
}

fn advice(phase: TaskPhase, message: String, actions: &[&'static str], urgent: bool) -> PhaseAdvice {
    PhaseAdvice {
        phase,
        message,
        actions: actions.to_vec(),
        urgent,
    }
}

impl PhaseAdvice {
    /// 渲染为 Prompt 片段
    pub fn to_prompt(&self) -> String {
        let mut s = String::from("## Phase Guidance\n");
        if self.urgent {
            s.push_str("URGENT: ");
        }
        s.push_str(&format!("[{}] {}\n\nSuggested actions:\n", self.phase, self.message));
        for (i, a) in self.actions.iter().enumerate() {
            s.push_str(&format!("{}. {}\n", i + 1, a));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_memory_is_gather() {
        let wm = WorkingMemory::new();
        let a = classify(0, &wm, 100);
        assert_eq!(a.phase, TaskPhase::Gather);
        assert!(!a.urgent);
    }

    #[test]
    fn test_sixteen_distinct_reads_without_writes_is_analyze() {
        let mut wm = WorkingMemory::new();
        for i in 0..16 {
            wm.record_read(format!("src/file_{}.rs", i));
        }
        let a = classify(16, &wm, 100);
        assert_eq!(a.phase, TaskPhase::Analyze);
        assert_eq!(a.actions[0], "Do not read new files");
    }

    #[test]
    fn test_loop_wins_over_everything() {
        let mut wm = WorkingMemory::new();
        for _ in 0..3 {
            wm.record_read("loop.py");
        }
        let a = classify(99, &wm, 100);
        assert_eq!(a.phase, TaskPhase::Stuck);
        assert!(a.urgent);
        assert!(a.message.contains("loop.py"));
    }

    #[test]
    fn test_eighty_percent_is_finalize() {
        let mut wm = WorkingMemory::new();
        wm.record_command("ls", true);
        assert_eq!(classify(79, &wm, 100).phase, TaskPhase::Execute);
        let a = classify(80, &wm, 100);
        assert_eq!(a.phase, TaskPhase::Finalize);
        assert!(a.urgent);
    }

    #[test]
    fn test_five_reads_is_analyze_and_commands_execute() {
        let mut wm = WorkingMemory::new();
        for i in 0..5 {
            wm.record_read(format!("f{}", i));
        }
        assert_eq!(classify(5, &wm, 100).phase, TaskPhase::Analyze);

        let mut wm = WorkingMemory::new();
        wm.record_read("a");
        wm.record_command("cargo test", true);
        assert_eq!(classify(2, &wm, 100).phase, TaskPhase::Execute);
    }

    #[test]
    fn test_prompt_marks_urgent() {
        let mut wm = WorkingMemory::new();
        for _ in 0..3 {
            wm.record_read("x");
        }
        let text = classify(1, &wm, 10).to_prompt();
        assert!(text.contains("URGENT"));
        assert!(text.contains("1. Stop the current operation immediately"));
    }
}
