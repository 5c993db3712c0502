//! 结构化 Markdown 文档
//!
//! 任务文档 = 标题块（第一个 `## ` 之前的所有行）+ 有序的 {header, body} 段落。
//! 段落以固定的二级标题分隔；所有修改都通过 find_section / section_mut 定位到单个段落，
//! 不做全文字符串替换，保证不会波及其它段落。渲染格式与手写 Markdown 一致，段落间以 `---` 分隔。

/// 段落分隔线
const RULE: &str = "---";

/// 一个二级标题段落
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// 标题文本（不含 `## ` 前缀）
    pub header: String,
    /// 段落正文，按行保存，不含首尾空行与分隔线
    pub lines: Vec<String>,
}

impl Section {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            lines: Vec::new(),
        }
    }

    pub fn with_body(header: impl Into<String>, body: &str) -> Self {
        let mut s = Self::new(header);
        s.set_body(body);
        s
    }

    /// 正文（已还原转义的标题行）
    pub fn body(&self) -> String {
        self.lines
            .iter()
            .map(|l| unescape_line(l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_body(&mut self, body: &str) {
        self.lines = trim_blank(body.lines().map(escape_line).collect());
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        for l in line.into().lines() {
            self.lines.push(escape_line(l));
        }
    }
}

/// 正文里以 `## ` 开头的行加 `\` 前缀，重新解析时不会被当成段落标题。
/// 已带反斜杠前缀的同类行再加一层，保证可逆
fn escape_line(line: &str) -> String {
    if line.trim_start_matches('\\').starts_with("## ") {
        format!("\\{}", line)
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> &str {
    match line.strip_prefix('\\') {
        Some(rest) if rest.trim_start_matches('\\').starts_with("## ") => rest,
        _ => line,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskDocument {
    /// 标题块（含 `# Task:` 标题、任务元信息、完成标记注释等）
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
}

impl TaskDocument {
    pub fn new(preamble: Vec<String>, sections: Vec<Section>) -> Self {
        Self { preamble, sections }
    }

    /// 解析 Markdown：以行首 `## ` 识别段落标题，段落末尾的空行与 `---` 被剥离
    pub fn parse(text: &str) -> Self {
        let mut preamble: Vec<String> = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        for line in text.lines() {
            if let Some(header) = line.strip_prefix("## ") {
                sections.push(Section::new(header.trim()));
                continue;
            }
            match sections.last_mut() {
                Some(section) => section.lines.push(line.to_string()),
                None => preamble.push(line.to_string()),
            }
        }
        let preamble = strip_rule(trim_blank(preamble));
        for section in &mut sections {
            section.lines = strip_rule(trim_blank(std::mem::take(&mut section.lines)));
        }
        Self { preamble, sections }
    }

    pub fn find_section(&self, header: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.header == header)
    }

    pub fn section_mut(&mut self, header: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.header == header)
    }

    /// 替换段落正文；段落不存在时返回 false
    pub fn replace_section(&mut self, header: &str, body: &str) -> bool {
        match self.section_mut(header) {
            Some(section) => {
                section.set_body(body);
                true
            }
            None => false,
        }
    }

    /// 渲染为 Markdown；exclude 中的段落不输出
    pub fn render_without(&self, exclude: &[&str]) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        let visible: Vec<&Section> = self
            .sections
            .iter()
            .filter(|s| !exclude.contains(&s.header.as_str()))
            .collect();
        for (i, section) in visible.iter().enumerate() {
            out.push('\n');
            if i > 0 || !self.preamble.is_empty() {
                out.push_str(RULE);
                out.push_str("\n\n");
            }
            out.push_str("## ");
            out.push_str(&section.header);
            out.push_str("\n\n");
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    pub fn render(&self) -> String {
        self.render_without(&[])
    }
}

/// 去掉首尾空行
fn trim_blank(mut lines: Vec<String>) -> Vec<String> {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    lines.drain(..start);
    lines
}

/// 去掉末尾的分隔线（渲染时统一补回）
fn strip_rule(mut lines: Vec<String>) -> Vec<String> {
    if lines.last().is_some_and(|l| l.trim() == RULE) {
        lines.pop();
        return trim_blank(lines);
    }
    lines
}
