//! 上下文压缩：带关键性感知淘汰的观察缓冲区
//!
//! 观察数超过 compression_threshold 时自动压缩到 max_observations 以内：
//! 关键观察（错误、用户拒绝）优先保留，最近 keep_recent 条始终保留，
//! 中间部分先折叠重复的工具失败，再按等距抽样填满剩余名额，最后按迭代号排序。
//! 另有一个入库时的轻量检查：最近失败签名重复时累加告警计数，给出「换策略 / 停下重想」提示。

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// 签名取内容前缀的字符数
const SIGNATURE_PREFIX_CHARS: usize = 100;
/// 失败签名滑动窗口大小
const FAILURE_WINDOW: usize = 5;
/// 在最近几条失败签名内查重
const FAILURE_LOOKBACK: usize = 3;
/// 同一签名出现超过该次数即折叠
const FOLD_THRESHOLD: usize = 2;

/// 观察类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    ToolResult,
    CommandResult,
    Error,
    Rejection,
    Success,
    Info,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::ToolResult => "tool_result",
            ObservationKind::CommandResult => "command_result",
            ObservationKind::Error => "error",
            ObservationKind::Rejection => "rejection",
            ObservationKind::Success => "success",
            ObservationKind::Info => "info",
        }
    }
}

/// 一条观察
#[derive(Clone, Debug, Serialize)]
pub struct Observation {
    /// 入库序号（单调递增），用于区分内容相同的不同观察
    pub seq: u64,
    pub content: String,
    pub kind: ObservationKind,
    pub iteration: usize,
    pub is_critical: bool,
    pub tool_name: Option<String>,
    pub succeeded: bool,
}

impl Observation {
    /// 重复失败分组用签名：tool_name + ":" + 内容前 100 字符
    pub fn signature(&self) -> String {
        signature(self.tool_name.as_deref(), &self.content)
    }

    fn is_tool_failure(&self) -> bool {
        !self.succeeded && self.tool_name.is_some()
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_critical {
            write!(f, "CRITICAL [{}] {}", self.kind.as_str(), self.content)
        } else {
            write!(f, "[{}] {}", self.kind.as_str(), self.content)
        }
    }
}

fn signature(tool_name: Option<&str>, content: &str) -> String {
    let prefix: String = content.chars().take(SIGNATURE_PREFIX_CHARS).collect();
    format!("{}:{}", tool_name.unwrap_or(""), prefix)
}

/// 重复失败告警
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureAdvisory {
    /// 软提示：换一种做法
    ChangeStrategy { repeats: usize },
    /// 硬提示：停下来重新思考
    StopAndReconsider { repeats: usize },
}

impl std::fmt::Display for FailureAdvisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureAdvisory::ChangeStrategy { repeats } => write!(
                f,
                "WARNING: the same tool call keeps failing ({} repeated failures). Change strategy instead of retrying.",
                repeats
            ),
            FailureAdvisory::StopAndReconsider { repeats } => write!(
                f,
                "STOP: identical failures repeated {} times. Stop and reconsider the approach before calling any tool again.",
                repeats
            ),
        }
    }
}

/// 压缩配置（对应配置文件 [context] 段）
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// 关闭后仅追加，不做关键性标记、压缩与告警
    pub enabled: bool,
    pub max_observations: usize,
    /// 超过该数量时触发压缩
    pub compression_threshold: usize,
    pub keep_recent: usize,
    /// 关闭后压缩退化为保留最后 max_observations 条
    pub keep_critical: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_observations: 20,
            compression_threshold: 30,
            keep_recent: 3,
            keep_critical: true,
        }
    }
}

/// 统计信息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompressorSummary {
    pub total: usize,
    pub critical: usize,
    pub errors: usize,
    pub rejections: usize,
    pub iterations: usize,
    pub duplicate_warnings: usize,
    pub compressions: usize,
    /// 粗略 token 估算（约 4 字符 / token）
    pub estimated_tokens: usize,
}

pub struct ContextCompressor {
    config: CompressorConfig,
    observations: Vec<Observation>,
    current_iteration: usize,
    next_seq: u64,
    failure_signatures: VecDeque<String>,
    duplicate_warnings: usize,
    compressions: usize,
}

impl ContextCompressor {
    pub fn new(config: CompressorConfig) -> Self {
        Self {
            config,
            observations: Vec::new(),
            current_iteration: 0,
            next_seq: 0,
            failure_signatures: VecDeque::with_capacity(FAILURE_WINDOW),
            duplicate_warnings: 0,
            compressions: 0,
        }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    pub fn next_iteration(&mut self) {
        self.current_iteration += 1;
    }

    /// 记录一条观察；若触发重复失败告警则返回当前告警
    pub fn add_observation(
        &mut self,
        content: impl Into<String>,
        kind: ObservationKind,
        critical: bool,
        tool_name: Option<&str>,
        succeeded: bool,
    ) -> Option<FailureAdvisory> {
        let content = content.into();
        let mut is_critical = critical;
        if self.config.enabled && matches!(kind, ObservationKind::Error | ObservationKind::Rejection) {
            is_critical = true;
        }

        let obs = Observation {
            seq: self.next_seq,
            content,
            kind,
            iteration: self.current_iteration,
            is_critical,
            tool_name: tool_name.map(str::to_string),
            succeeded,
        };
        self.next_seq += 1;

        if !self.config.enabled {
            self.observations.push(obs);
            return None;
        }

        let advisory = if obs.is_tool_failure() {
            self.track_failure(obs.signature())
        } else {
            None
        };

        self.observations.push(obs);
        if self.observations.len() > self.config.compression_threshold {
            self.compress();
        }
        advisory
    }

    /// 记录一次用户拒绝（始终为关键观察）
    pub fn add_rejection(&mut self, command: &str, reason: &str) {
        self.add_observation(
            format!("{}: {}", reason, command),
            ObservationKind::Rejection,
            true,
            None,
            false,
        );
        tracing::info!(command = %command, "recorded rejection");
    }

    /// 入库时检查：最新签名在最近 3 条失败内出现 >= 2 次则计数 +1
    fn track_failure(&mut self, sig: String) -> Option<FailureAdvisory> {
        if self.failure_signatures.len() == FAILURE_WINDOW {
            self.failure_signatures.pop_front();
        }
        self.failure_signatures.push_back(sig);

        let newest = self.failure_signatures.back()?;
        let repeats = self
            .failure_signatures
            .iter()
            .rev()
            .take(FAILURE_LOOKBACK)
            .filter(|s| *s == newest)
            .count();
        if repeats >= 2 {
            self.duplicate_warnings += 1;
            tracing::warn!(count = self.duplicate_warnings, "repeated tool failure");
            return self.failure_advisory();
        }
        None
    }

    /// 当前告警级别：计数 >= 3 为硬提示，>= 2 为软提示
    pub fn failure_advisory(&self) -> Option<FailureAdvisory> {
        match self.duplicate_warnings {
            n if n >= 3 => Some(FailureAdvisory::StopAndReconsider { repeats: n }),
            2 => Some(FailureAdvisory::ChangeStrategy { repeats: 2 }),
            _ => None,
        }
    }

    pub fn duplicate_warnings(&self) -> usize {
        self.duplicate_warnings
    }

    /// 生成供 LLM 使用的观察列表文本；超出上限时按压缩规则挑选（不修改缓冲区）
    pub fn get_context(&self, max_observations: Option<usize>) -> String {
        if self.observations.is_empty() {
            return "No previous observations.".to_string();
        }
        let max = max_observations.unwrap_or(self.config.max_observations);
        let selected = if self.observations.len() <= max {
            self.observations.clone()
        } else {
            self.select(max)
        };

        let mut lines = Vec::with_capacity(selected.len() + 1);
        if self.config.enabled {
            if let Some(advisory) = self.failure_advisory() {
                lines.push(advisory.to_string());
            }
        }
        for (i, obs) in selected.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, obs));
        }
        lines.join("\n")
    }

    /// 压缩缓冲区，使长度不超过 max_observations
    pub fn compress(&mut self) {
        let max = self.config.max_observations;
        let before = self.observations.len();
        self.observations = self.select(max);
        self.compressions += 1;
        tracing::debug!(before, after = self.observations.len(), "compressed observations");
    }

    /// 挑选不超过 max 条观察，按迭代号升序返回
    fn select(&self, max: usize) -> Vec<Observation> {
        let all = &self.observations;
        if all.len() <= max {
            return all.clone();
        }
        if !self.config.keep_critical {
            return all[all.len() - max..].to_vec();
        }

        // 1. 内容不重复的关键观察；超过上限时保留最近的
        let mut seen_content: HashSet<&str> = HashSet::new();
        let mut critical: Vec<usize> = Vec::new();
        let mut duplicate_critical: HashSet<usize> = HashSet::new();
        for (i, obs) in all.iter().enumerate() {
            if !obs.is_critical {
                continue;
            }
            if seen_content.insert(obs.content.as_str()) {
                critical.push(i);
            } else {
                duplicate_critical.insert(i);
            }
        }
        if critical.len() > max {
            critical.drain(..critical.len() - max);
        }

        let mut chosen: HashSet<usize> = critical.iter().copied().collect();
        let mut budget = max - critical.len();

        // 2. 最近 keep_recent 条
        let recent_start = all.len().saturating_sub(self.config.keep_recent);
        let mut recent: Vec<usize> = Vec::new();
        for i in (recent_start..all.len()).rev() {
            if budget == 0 {
                break;
            }
            if chosen.contains(&i) || duplicate_critical.contains(&i) {
                continue;
            }
            recent.push(i);
            chosen.insert(i);
            budget -= 1;
        }

        // 3. 中间部分：既非关键也非最近
        let middle: Vec<usize> = (0..recent_start)
            .filter(|i| !all[*i].is_critical && !chosen.contains(i))
            .collect();

        // 4. 折叠重复工具失败：保留首末两条 + 一条合成摘要
        let middle = self.fold_repeated_failures(&middle);

        // 5. 等距抽样填满剩余名额
        let sampled = stride_sample(&middle, budget);

        let mut out: Vec<Observation> = critical
            .iter()
            .chain(recent.iter())
            .map(|i| all[*i].clone())
            .chain(sampled.into_iter().map(|slot| match slot {
                Slot::Kept(i) => all[i].clone(),
                Slot::Folded(obs) => obs,
            }))
            .collect();
        out.sort_by_key(|o| (o.iteration, o.seq));
        out
    }

    /// 折叠中间部分的重复工具失败；合成摘要紧跟在该签名最后一次出现之后
    fn fold_repeated_failures(&self, middle: &[usize]) -> Vec<Slot> {
        let all = &self.observations;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &i in middle {
            if all[i].is_tool_failure() {
                groups.entry(all[i].signature()).or_default().push(i);
            }
        }

        let mut dropped: HashSet<usize> = HashSet::new();
        let mut summaries: BTreeMap<usize, Observation> = BTreeMap::new();
        for idxs in groups.values() {
            if idxs.len() <= FOLD_THRESHOLD {
                continue;
            }
            let last = idxs[idxs.len() - 1];
            dropped.extend(idxs[1..idxs.len() - 1].iter().copied());
            let anchor = &all[last];
            let tool = anchor.tool_name.clone().unwrap_or_default();
            summaries.insert(
                last,
                Observation {
                    seq: anchor.seq,
                    content: format!("[compressed] tool {} failed {} times", tool, idxs.len()),
                    kind: ObservationKind::Info,
                    iteration: anchor.iteration,
                    is_critical: false,
                    tool_name: anchor.tool_name.clone(),
                    // 摘要本身不算失败，避免再次被折叠
                    succeeded: true,
                },
            );
        }

        let mut slots = Vec::with_capacity(middle.len());
        for &i in middle {
            if dropped.contains(&i) {
                continue;
            }
            slots.push(Slot::Kept(i));
            if let Some(summary) = summaries.remove(&i) {
                slots.push(Slot::Folded(summary));
            }
        }
        slots
    }

    pub fn summary(&self) -> CompressorSummary {
        let chars: usize = self.observations.iter().map(|o| o.content.chars().count()).sum();
        CompressorSummary {
            total: self.observations.len(),
            critical: self.observations.iter().filter(|o| o.is_critical).count(),
            errors: self
                .observations
                .iter()
                .filter(|o| o.kind == ObservationKind::Error)
                .count(),
            rejections: self
                .observations
                .iter()
                .filter(|o| o.kind == ObservationKind::Rejection)
                .count(),
            iterations: self.current_iteration,
            duplicate_warnings: self.duplicate_warnings,
            compressions: self.compressions,
            estimated_tokens: chars / 4,
        }
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.current_iteration = 0;
        self.failure_signatures.clear();
        self.duplicate_warnings = 0;
        tracing::debug!("cleared context");
    }
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self::new(CompressorConfig::default())
    }
}

/// 中间部分的一个位置：原缓冲区下标，或折叠产生的合成摘要
#[derive(Clone, Debug)]
enum Slot {
    Kept(usize),
    Folded(Observation),
}

/// 等距抽样：stride = len / budget，每隔 stride 取一个，最多 budget 个
fn stride_sample<T: Clone>(items: &[T], budget: usize) -> Vec<T> {
    if budget == 0 {
        return Vec::new();
    }
    if items.len() <= budget {
        return items.to_vec();
    }
    let stride = (items.len() / budget).max(1);
    items.iter().step_by(stride).take(budget).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, threshold: usize) -> CompressorConfig {
        CompressorConfig {
            max_observations: max,
            compression_threshold: threshold,
            ..CompressorConfig::default()
        }
    }

    fn add_info(c: &mut ContextCompressor, text: &str) {
        c.add_observation(text, ObservationKind::ToolResult, false, None, true);
        c.next_iteration();
    }

    #[test]
    fn test_errors_forced_critical() {
        let mut c = ContextCompressor::default();
        c.add_observation("boom", ObservationKind::Error, false, None, false);
        c.add_observation("user said no", ObservationKind::Rejection, false, None, false);
        assert!(c.observations().iter().all(|o| o.is_critical));
    }

    #[test]
    fn test_disabled_only_appends() {
        let mut c = ContextCompressor::new(CompressorConfig {
            enabled: false,
            ..config(2, 3)
        });
        for i in 0..10 {
            c.add_observation(format!("e{}", i), ObservationKind::Error, false, Some("t"), false);
        }
        assert_eq!(c.len(), 10);
        assert!(c.observations().iter().all(|o| !o.is_critical));
        assert_eq!(c.duplicate_warnings(), 0);
    }

    #[test]
    fn test_eviction_bound_holds() {
        let mut c = ContextCompressor::new(config(5, 8));
        for i in 0..50 {
            if i % 7 == 0 {
                c.add_observation(format!("err {}", i), ObservationKind::Error, false, None, false);
            } else {
                add_info(&mut c, &format!("obs {}", i));
            }
            if c.len() > 8 {
                panic!("buffer exceeded threshold");
            }
        }
        c.compress();
        assert!(c.len() <= 5);
    }

    #[test]
    fn test_eviction_bound_with_many_criticals() {
        let mut c = ContextCompressor::new(config(4, 6));
        for i in 0..20 {
            c.add_observation(format!("err {}", i), ObservationKind::Error, false, None, false);
            c.next_iteration();
        }
        c.compress();
        assert!(c.len() <= 4);
        // 关键观察超限时保留最近的
        assert!(c.observations().iter().any(|o| o.content == "err 19"));
    }

    #[test]
    fn test_critical_retention() {
        let mut c = ContextCompressor::new(config(10, 12));
        for i in 0..40 {
            if i == 2 || i == 11 || i == 23 {
                c.add_observation(format!("critical {}", i), ObservationKind::Error, false, None, false);
            } else {
                add_info(&mut c, &format!("obs {}", i));
            }
        }
        c.compress();
        for i in [2, 11, 23] {
            let want = format!("critical {}", i);
            assert!(c.observations().iter().any(|o| o.content == want), "lost {}", want);
        }
    }

    #[test]
    fn test_mixed_selection_is_chronological_with_fold_summary() {
        let mut c = ContextCompressor::new(CompressorConfig {
            keep_recent: 2,
            ..config(8, 100)
        });
        add_info(&mut c, "m1");
        add_info(&mut c, "m2");
        c.add_observation("build broken", ObservationKind::Error, false, None, false);
        c.next_iteration();
        for _ in 0..4 {
            c.add_observation("permission denied", ObservationKind::ToolResult, false, Some("write_file"), false);
            c.next_iteration();
        }
        for i in 8..14 {
            add_info(&mut c, &format!("m{}", i));
        }
        add_info(&mut c, "r1");
        add_info(&mut c, "r2");
        assert_eq!(c.len(), 15);

        // 关键 1 条 + 最近 2 条，中间 11 个槽位（含折叠摘要）按步长 2 抽 5 个
        let expected = vec![
            "m1",
            "build broken",
            "permission denied",
            "[compressed] tool write_file failed 4 times",
            "m9",
            "m11",
            "r1",
            "r2",
        ];

        let context = c.get_context(None);
        let lines: Vec<&str> = context.lines().collect();
        assert!(lines[0].starts_with("STOP"));
        assert_eq!(lines.len(), 9);
        assert!(lines[4].starts_with("4. "));
        assert!(lines[4].ends_with("[compressed] tool write_file failed 4 times"));
        assert!(lines[2].contains("CRITICAL"));

        c.compress();
        let contents: Vec<&str> = c.observations().iter().map(|o| o.content.as_str()).collect();
        assert_eq!(contents, expected);
        let iterations: Vec<usize> = c.observations().iter().map(|o| o.iteration).collect();
        assert!(iterations.windows(2).all(|w| w[0] <= w[1]));
        let summary = &c.observations()[3];
        assert!(!summary.is_critical);
        assert_eq!(summary.iteration, c.observations()[2].iteration + 3);
    }

    #[test]
    fn test_recent_kept_and_order_chronological() {
        let mut c = ContextCompressor::new(config(6, 100));
        for i in 0..30 {
            add_info(&mut c, &format!("obs {}", i));
        }
        let ctx = c.get_context(None);
        assert!(ctx.contains("obs 29"));
        assert!(ctx.contains("obs 28"));
        assert!(ctx.contains("obs 27"));
        assert_eq!(ctx.lines().count(), 6);

        let selected = c.select(6);
        assert!(selected.windows(2).all(|w| w[0].iteration <= w[1].iteration));
    }

    #[test]
    fn test_stride_sampling_spreads() {
        // 24 条中间观察、预算 4 -> stride 6 -> 下标 0, 6, 12, 18
        let items: Vec<usize> = (0..24).collect();
        assert_eq!(stride_sample(&items, 4), vec![0, 6, 12, 18]);
        assert_eq!(stride_sample(&items, 0), Vec::<usize>::new());
        assert_eq!(stride_sample(&items[..3], 5), vec![0, 1, 2]);
    }

    #[test]
    fn test_repeated_failures_folded() {
        let mut c = ContextCompressor::new(CompressorConfig {
            keep_critical: true,
            ..config(10, 100)
        });
        for _ in 0..5 {
            c.add_observation("permission denied", ObservationKind::ToolResult, false, Some("write_file"), false);
            c.next_iteration();
        }
        for i in 0..20 {
            add_info(&mut c, &format!("obs {}", i));
        }
        let selected = c.select(10);
        assert!(selected.len() <= 10);
        let failures = selected
            .iter()
            .filter(|o| o.content == "permission denied")
            .count();
        assert!(failures <= 2);
    }

    #[test]
    fn test_fold_produces_summary_entry() {
        let mut c = ContextCompressor::new(config(30, 100));
        for _ in 0..4 {
            c.add_observation("not found", ObservationKind::ToolResult, false, Some("read_file"), false);
            c.next_iteration();
        }
        let middle: Vec<usize> = (0..4).collect();
        let slots = c.fold_repeated_failures(&middle);
        assert_eq!(slots.len(), 3);
        assert!(matches!(slots[0], Slot::Kept(0)));
        assert!(matches!(slots[1], Slot::Kept(3)));
        match &slots[2] {
            Slot::Folded(obs) => {
                assert_eq!(obs.content, "[compressed] tool read_file failed 4 times");
                assert_eq!(obs.iteration, 3);
            }
            other => panic!("expected folded summary, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_failure_advisories() {
        let mut c = ContextCompressor::default();
        let a1 = c.add_observation("timeout", ObservationKind::ToolResult, false, Some("http"), false);
        assert!(a1.is_none());
        // 第 2 次：计数 1，尚无提示
        let a2 = c.add_observation("timeout", ObservationKind::ToolResult, false, Some("http"), false);
        assert!(a2.is_none());
        assert_eq!(c.duplicate_warnings(), 1);
        let a3 = c.add_observation("timeout", ObservationKind::ToolResult, false, Some("http"), false);
        assert_eq!(a3, Some(FailureAdvisory::ChangeStrategy { repeats: 2 }));
        let a4 = c.add_observation("timeout", ObservationKind::ToolResult, false, Some("http"), false);
        assert_eq!(a4, Some(FailureAdvisory::StopAndReconsider { repeats: 3 }));
        assert!(c.get_context(None).starts_with("STOP"));
    }

    #[test]
    fn test_successes_do_not_count_as_duplicates() {
        let mut c = ContextCompressor::default();
        for _ in 0..5 {
            c.add_observation("ok", ObservationKind::ToolResult, false, Some("ls"), true);
        }
        assert_eq!(c.duplicate_warnings(), 0);
    }

    #[test]
    fn test_keep_critical_off_truncates() {
        let mut c = ContextCompressor::new(CompressorConfig {
            keep_critical: false,
            ..config(3, 5)
        });
        c.add_observation("first error", ObservationKind::Error, false, None, false);
        for i in 0..5 {
            add_info(&mut c, &format!("obs {}", i));
        }
        assert_eq!(c.len(), 3);
        assert!(!c.observations().iter().any(|o| o.content == "first error"));
    }

    #[test]
    fn test_empty_context_text() {
        let c = ContextCompressor::default();
        assert_eq!(c.get_context(None), "No previous observations.");
    }

    #[test]
    fn test_rejection_and_summary() {
        let mut c = ContextCompressor::default();
        c.add_rejection("rm -rf /", "User rejected");
        c.add_observation("e", ObservationKind::Error, false, None, false);
        c.next_iteration();
        let s = c.summary();
        assert_eq!(s.total, 2);
        assert_eq!(s.critical, 2);
        assert_eq!(s.rejections, 1);
        assert_eq!(s.errors, 1);
        assert_eq!(s.iterations, 1);
        assert!(c.get_context(None).contains("CRITICAL [rejection] User rejected: rm -rf /"));
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.current_iteration(), 0);
    }
}
