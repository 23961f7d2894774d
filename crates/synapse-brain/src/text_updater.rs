//! Pure text-section updater behind the UPDATE_CONTEXT tool.
//!
//! Applies a list of model-proposed operations to a context text and returns
//! the updated text plus a per-operation log. No I/O: persistence is the
//! caller's concern and only happens after approval.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Beg,
    Mid,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Add,
    Replace,
    Delete,
}

/// One model-proposed edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub section_type: SectionType,
    pub operation: OperationType,
    #[serde(default)]
    pub new_content: String,
    /// Locator text. Required for `mid`; optional anchor for `beg`/`end`
    /// replace/delete.
    #[serde(default)]
    pub context: Option<String>,
}

/// Result of applying all operations in order. Application stops at the
/// first failure so later edits never run against a wrong intermediate
/// state.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub success: bool,
    pub updated_text: String,
    pub operations_log: Vec<Value>,
    pub error: Option<String>,
}

pub fn apply_operations(text: &str, operations: &[Operation]) -> UpdateResult {
    let mut current = text.to_string();
    let mut log = Vec::new();
    let mut success = true;

    for (i, op) in operations.iter().enumerate() {
        match apply_one(&current, op) {
            Ok(updated) => {
                current = updated;
                log.push(json!({
                    "op_index": i,
                    "section_type": op.section_type,
                    "operation": op.operation,
                    "success": true,
                }));
            }
            Err(err) => {
                log.push(json!({
                    "op_index": i,
                    "section_type": op.section_type,
                    "operation": op.operation,
                    "success": false,
                    "error": err,
                }));
                success = false;
                break;
            }
        }
    }

    UpdateResult {
        success,
        updated_text: current,
        operations_log: log,
        error: (!success).then(|| "one or more text operations failed".to_string()),
    }
}

fn apply_one(text: &str, op: &Operation) -> Result<String, String> {
    match op.section_type {
        SectionType::Beg => apply_beg(text, op),
        SectionType::End => apply_end(text, op),
        SectionType::Mid => apply_mid(text, op),
    }
}

fn apply_beg(text: &str, op: &Operation) -> Result<String, String> {
    match op.operation {
        OperationType::Add => Ok(format!("{}{}", op.new_content, text)),
        OperationType::Replace => match &op.context {
            Some(ctx) => {
                if let Some(rest) = text.strip_prefix(ctx.as_str()) {
                    Ok(format!("{}{}", op.new_content, rest))
                } else {
                    Err(format!("text does not start with context '{}'", ctx))
                }
            }
            // Without an anchor, replace the first N characters.
            None => {
                let n = op.new_content.chars().count();
                let tail: String = text.chars().skip(n).collect();
                Ok(format!("{}{}", op.new_content, tail))
            }
        },
        OperationType::Delete => match &op.context {
            Some(ctx) => text
                .strip_prefix(ctx.as_str())
                .map(String::from)
                .ok_or_else(|| format!("text does not start with context '{}'", ctx)),
            None => Err("delete at the beginning requires a context to remove".to_string()),
        },
    }
}

fn apply_end(text: &str, op: &Operation) -> Result<String, String> {
    match op.operation {
        OperationType::Add => Ok(format!("{}{}", text, op.new_content)),
        OperationType::Replace => match &op.context {
            Some(ctx) => {
                if let Some(head) = text.strip_suffix(ctx.as_str()) {
                    Ok(format!("{}{}", head, op.new_content))
                } else {
                    Err(format!("text does not end with context '{}'", ctx))
                }
            }
            None => {
                let total = text.chars().count();
                let n = op.new_content.chars().count().min(total);
                let head: String = text.chars().take(total - n).collect();
                Ok(format!("{}{}", head, op.new_content))
            }
        },
        OperationType::Delete => match &op.context {
            Some(ctx) => text
                .strip_suffix(ctx.as_str())
                .map(String::from)
                .ok_or_else(|| format!("text does not end with context '{}'", ctx)),
            None => Err("delete at the end requires a context to remove".to_string()),
        },
    }
}

fn apply_mid(text: &str, op: &Operation) -> Result<String, String> {
    let ctx = op
        .context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "context is required for mid-section operations".to_string())?;

    let pos = text
        .find(ctx)
        .ok_or_else(|| format!("context '{}' not found in text", ctx))?;

    match op.operation {
        // Insert new_content right after the first occurrence of the context.
        OperationType::Add => {
            let insert_at = pos + ctx.len();
            Ok(format!(
                "{}{}{}",
                &text[..insert_at],
                op.new_content,
                &text[insert_at..]
            ))
        }
        OperationType::Replace => Ok(format!(
            "{}{}{}",
            &text[..pos],
            op.new_content,
            &text[pos + ctx.len()..]
        )),
        OperationType::Delete => Ok(format!("{}{}", &text[..pos], &text[pos + ctx.len()..])),
    }
}
