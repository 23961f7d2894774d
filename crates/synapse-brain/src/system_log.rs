use std::collections::BTreeMap;

/// Per-entry cap — one runaway worker message must not blow up the prompt.
const MAX_ENTRY_CHARS: usize = 2_000;
/// Per-section cap. Oldest lines are dropped first when exceeded.
const MAX_SECTION_CHARS: usize = 12_000;

/// Worker log area of the system prompt.
///
/// Each worker job gets its own bounded section; the listener replaces a
/// section wholesale when it re-injects its concatenated entry buffer, and
/// appends waiting-context blocks one at a time.
#[derive(Debug, Default)]
pub struct SystemLog {
    /// job_id (or synthetic section id) → rendered text.
    sections: BTreeMap<String, String>,
}

impl SystemLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Replace the whole section for `id`.
    pub fn set_section(&mut self, id: &str, text: &str) {
        self.sections
            .insert(id.to_string(), clamp_tail(text, MAX_SECTION_CHARS));
    }

    /// Append one timestamped entry to the section for `id`.
    pub fn append_entry(&mut self, id: &str, timestamp: &str, payload: &str) {
        let line = format!("{} | {}", timestamp, clamp_head(payload, MAX_ENTRY_CHARS));
        let section = self.sections.entry(id.to_string()).or_default();
        if !section.is_empty() {
            section.push('\n');
        }
        section.push_str(&line);
        if section.chars().count() > MAX_SECTION_CHARS {
            *section = clamp_tail(section, MAX_SECTION_CHARS);
        }
    }

    pub fn remove_section(&mut self, id: &str) {
        self.sections.remove(id);
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }

    /// Render all sections for inclusion in the system prompt.
    pub fn render(&self) -> String {
        if self.sections.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n\n## Background job log\n");
        for (id, text) in &self.sections {
            out.push_str(&format!("\n### {}\n{}\n", id, text));
        }
        out
    }
}

/// Keep the head of a text, marking the cut.
fn clamp_head(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}…", kept)
}

/// Keep the tail of a text — newest log lines matter most.
fn clamp_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped = count - max_chars;
    let kept: String = text.chars().skip(skipped).collect();
    format!("…{}", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate_under_their_section() {
        let mut log = SystemLog::new();
        log.append_entry("job1", "2026-01-01 10:00:00", "step one done");
        log.append_entry("job1", "2026-01-01 10:05:00", "step two done");
        let rendered = log.render();
        assert!(rendered.contains("### job1"));
        assert!(rendered.contains("step one done"));
        assert!(rendered.contains("step two done"));
    }

    #[test]
    fn oversized_entry_is_clamped() {
        let mut log = SystemLog::new();
        log.append_entry("job1", "ts", &"x".repeat(10_000));
        assert!(log.render().chars().count() < 3_000);
    }

    #[test]
    fn section_keeps_newest_tail_when_full() {
        let mut log = SystemLog::new();
        for i in 0..200 {
            log.append_entry("job1", "ts", &format!("entry-{i} {}", "pad".repeat(40)));
        }
        let rendered = log.render();
        assert!(rendered.contains("entry-199"));
        assert!(!rendered.contains("entry-0 "));
    }

    #[test]
    fn set_section_replaces_wholesale() {
        let mut log = SystemLog::new();
        log.append_entry("job1", "ts", "old");
        log.set_section("job1", "fresh buffer");
        let rendered = log.render();
        assert!(rendered.contains("fresh buffer"));
        assert!(!rendered.contains("old"));
    }
}
