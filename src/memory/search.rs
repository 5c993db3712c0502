//! 相似任务检索
//!
//! TaskSearch 是向量检索的接入点；默认 KeywordTaskSearch 按关键词重叠打分，
//! 得分 = 查询与描述的词重叠数 / sqrt(描述词数)。后续可接 embedding 服务实现同一 trait。

use std::collections::HashSet;

use serde::Serialize;

use crate::memory::lifecycle::TaskRecord;

/// 一条相似任务
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimilarTask {
    pub task_id: String,
    pub score: f64,
    pub description: String,
}

/// 相似任务检索；实现失败时由调用方降级为空结果
pub trait TaskSearch: Send + Sync {
    fn similar(&self, query: &str, k: usize) -> anyhow::Result<Vec<SimilarTask>>;
}

/// 关键词检索：基于任务描述，不依赖外部服务
#[derive(Clone, Debug, Default)]
pub struct KeywordTaskSearch {
    /// (task_id, description, 小写词集合)
    entries: Vec<(String, String, HashSet<String>)>,
}

fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

fn score(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
    let overlap = query.intersection(doc).count();
    if overlap == 0 {
        return 0.0;
    }
    (overlap as f64) / (doc.len().max(1) as f64).sqrt()
}

impl KeywordTaskSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut s = Self::new();
        for r in records {
            s.add(&r.id, &r.description);
        }
        s
    }

    pub fn add(&mut self, task_id: &str, description: &str) {
        let tokens = tokenize_lower(description);
        self.entries
            .push((task_id.to_string(), description.to_string(), tokens));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TaskSearch for KeywordTaskSearch {
    fn similar(&self, query: &str, k: usize) -> anyhow::Result<Vec<SimilarTask>> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<SimilarTask> = self
            .entries
            .iter()
            .map(|(id, description, tokens)| SimilarTask {
                task_id: id.clone(),
                score: score(&query_tokens, tokens),
                description: description.clone(),
            })
            .filter(|t| t.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_by_overlap_over_length() {
        let mut s = KeywordTaskSearch::new();
        s.add("a", "fix login bug in auth service and refactor the session cache layer");
        s.add("b", "fix login bug");
        s.add("c", "write docs");
        let hits = s.similar("login bug", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].task_id, "b");
        assert_eq!(hits[1].task_id, "a");
    }

    #[test]
    fn test_respects_k_and_empty_query() {
        let mut s = KeywordTaskSearch::new();
        s.add("a", "deploy service");
        s.add("b", "deploy docs");
        assert_eq!(s.similar("deploy", 1).unwrap().len(), 1);
        assert!(s.similar("  ", 5).unwrap().is_empty());
        assert!(s.similar("unrelated", 5).unwrap().is_empty());
    }
}
