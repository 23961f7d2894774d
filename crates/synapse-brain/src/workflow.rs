//! The unified streaming workflow.
//!
//! One loop drives user messages, scheduled-task executions, and
//! worker-callback continuations; the only differences are the
//! `enable_streaming` flag and the initial instruction text. Per turn it
//! calls the provider, fans text deltas out to the WS channel, executes tool
//! calls, and feeds results back — until the turn produces only text, the
//! mission terminates, or the turn limit is hit. Before every turn the token
//! budget is checked and the history summarized away when exceeded.
//!
//! Cancellation and errors are explicit result branches: every exit path
//! runs the same finalization that patches the assistant message in the
//! RTDB, so a cancelled or failed stream never leaves a dangling
//! `status=streaming` record.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use synapse_core::config::WorkflowConfig;
use synapse_core::types::chat_channel;
use synapse_hub::{event, WsHub};
use synapse_provider::{ChatRequest, LlmProvider, ProviderError, StreamEvent, ToolCall, ToolChoice};
use synapse_rtdb::{paths, RtdbPort};

use crate::brain::Brain;
use crate::error::{BrainError, Result};
use crate::ports::ExecutionStore;
use crate::summary::summarize_and_reset;
use crate::task::ExecutionReport;
use crate::tools::{build_tools, execute_tool, kind_of, to_definitions, Tool, ToolDeps, ToolKind};

/// Shared collaborators of every workflow invocation.
pub struct WorkflowContext {
    pub provider: Arc<dyn LlmProvider>,
    pub rtdb: Arc<dyn RtdbPort>,
    pub hub: Arc<WsHub>,
    pub tools: Arc<ToolDeps>,
    pub model: String,
    pub summary_model: String,
    pub config: WorkflowConfig,
}

/// Per-invocation inputs.
pub struct WorkflowRequest {
    /// Initial user/instruction content. Empty when continuing from history.
    pub initial_content: String,
    pub assistant_message_id: String,
    pub enable_streaming: bool,
    /// Full system prompt override (scheduled diagnostics use this); normal
    /// runs render the brain's prompt every turn.
    pub system_prompt_override: Option<String>,
}

/// How the workflow ended. Errors are returned as `Err` after the RTDB
/// record has been patched.
#[derive(Debug)]
pub enum WorkflowOutcome {
    Completed {
        text: String,
        turns: u32,
        mission_completed: bool,
    },
    Cancelled {
        partial_text: String,
    },
}

/// Result of the turn loop proper, before finalization.
enum RunEnd {
    Complete,
    Cancelled,
}

struct RunState {
    accumulator: String,
    turns: u32,
    mission_completed: bool,
    terminate_input: Value,
}

pub async fn run_unified_workflow(
    ctx: &Arc<WorkflowContext>,
    brain: &Arc<Brain>,
    req: WorkflowRequest,
    cancel: CancellationToken,
) -> Result<WorkflowOutcome> {
    let channel = chat_channel(&brain.user_id, &brain.tenant_id, &brain.thread_key);
    let message_path = paths::thread_message(
        &brain.tenant_id,
        brain.chat_mode(),
        &brain.thread_key,
        &req.assistant_message_id,
    );

    if req.enable_streaming {
        ctx.hub
            .broadcast(
                brain.user_id.as_str(),
                event(
                    "llm.stream_start",
                    &channel,
                    json!({ "message_id": req.assistant_message_id }),
                ),
            )
            .await;
    }

    if !req.initial_content.is_empty() {
        brain.history().add_user_text(&req.initial_content);
    }

    let mut state = RunState {
        accumulator: String::new(),
        turns: 0,
        mission_completed: false,
        terminate_input: Value::Null,
    };

    let run = run_turns(ctx, brain, &req, &channel, &cancel, &mut state).await;

    // Finalization — the "always" block. Every branch patches the RTDB
    // record; broadcast failures are logged inside the hub and never mask
    // the outcome.
    match run {
        Ok(RunEnd::Complete) => {
            let content = json!({ "message": { "argumentText": state.accumulator } }).to_string();
            ctx.rtdb
                .update(
                    &message_path,
                    json!({
                        "content": content,
                        "status": "complete",
                        "streaming_progress": 1,
                        "turns": state.turns,
                        "mission_completed": state.mission_completed,
                        "completed_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
            if req.enable_streaming {
                ctx.hub
                    .broadcast(
                        brain.user_id.as_str(),
                        event(
                            "llm.stream_end",
                            &channel,
                            json!({ "message_id": req.assistant_message_id }),
                        ),
                    )
                    .await;
            }

            if state.mission_completed {
                complete_task_execution(ctx, brain, &state).await;
            }

            info!(
                thread = %brain.thread_key,
                turns = state.turns,
                mission_completed = state.mission_completed,
                chars = state.accumulator.len(),
                "workflow complete"
            );
            Ok(WorkflowOutcome::Completed {
                text: state.accumulator,
                turns: state.turns,
                mission_completed: state.mission_completed,
            })
        }
        Ok(RunEnd::Cancelled) => {
            let content = json!({ "message": { "argumentText": state.accumulator } }).to_string();
            if let Err(e) = ctx
                .rtdb
                .update(
                    &message_path,
                    json!({
                        "content": content,
                        "status": "interrupted",
                        "turns": state.turns,
                        "interrupted_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await
            {
                warn!(error = %e, "partial RTDB patch failed on cancellation");
            }
            if req.enable_streaming {
                ctx.hub
                    .broadcast(
                        brain.user_id.as_str(),
                        event(
                            "llm_stream_interrupted",
                            &channel,
                            json!({ "message_id": req.assistant_message_id }),
                        ),
                    )
                    .await;
            }
            info!(thread = %brain.thread_key, turns = state.turns, "workflow cancelled");
            Ok(WorkflowOutcome::Cancelled {
                partial_text: state.accumulator,
            })
        }
        Err(e) => {
            if let Err(patch_err) = ctx
                .rtdb
                .update(
                    &message_path,
                    json!({
                        "status": "error",
                        "error": e.to_string(),
                        "error_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await
            {
                warn!(error = %patch_err, "error RTDB patch failed");
            }
            if req.enable_streaming {
                ctx.hub
                    .broadcast(
                        brain.user_id.as_str(),
                        event(
                            "llm.error",
                            &channel,
                            json!({
                                "message_id": req.assistant_message_id,
                                "error": e.to_string(),
                            }),
                        ),
                    )
                    .await;
            }
            Err(e)
        }
    }
}

/// The agentic turn loop.
async fn run_turns(
    ctx: &Arc<WorkflowContext>,
    brain: &Arc<Brain>,
    req: &WorkflowRequest,
    channel: &str,
    cancel: &CancellationToken,
    state: &mut RunState,
) -> Result<RunEnd> {
    let tools = build_tools(&ctx.tools, brain);
    let tool_defs = to_definitions(&tools);

    for turn in 0..ctx.config.max_turns {
        if cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }
        state.turns = turn + 1;

        // Budget check before every provider call. Summarization failure is
        // tolerated — the turn proceeds with the long history and the check
        // fires again next turn.
        if brain.total_context_tokens() >= ctx.config.token_budget {
            let reset = summarize_and_reset(
                &ctx.provider,
                &ctx.summary_model,
                brain,
                ctx.config.summary_max_tokens,
            )
            .await
            .is_ok();
            // The reset also swallowed the pending user turn; the provider
            // needs at least one message to continue from.
            if reset && brain.history().is_empty() {
                let resume = if turn == 0 && !req.initial_content.is_empty() {
                    req.initial_content.clone()
                } else {
                    "Continue from the summarized context above.".to_string()
                };
                brain.history().add_user_text(&resume);
            }
        }

        let system = req
            .system_prompt_override
            .clone()
            .unwrap_or_else(|| brain.render_system_prompt());
        let raw_messages = brain.history().to_raw_messages();

        let request = ChatRequest {
            model: ctx.model.clone(),
            system,
            messages: Vec::new(),
            max_tokens: 4096,
            stream: req.enable_streaming,
            tools: tool_defs.clone(),
            tool_choice: ToolChoice::Auto,
            raw_messages: Some(raw_messages),
        };

        debug!(thread = %brain.thread_key, turn, "workflow turn");

        let (turn_text, tool_calls) = match stream_one_turn(ctx, brain, req, channel, cancel, request).await? {
            TurnResult::Cancelled => return Ok(RunEnd::Cancelled),
            TurnResult::Finished { text, tool_calls } => (text, tool_calls),
        };

        if tool_calls.is_empty() {
            // Text-only turn: the model is done.
            if !turn_text.is_empty() {
                brain.history().add_assistant_text(&turn_text);
            }
            return Ok(RunEnd::Complete);
        }

        // Assistant turn: any text plus the tool_use blocks.
        let mut assistant_blocks: Vec<Value> = Vec::new();
        if !turn_text.is_empty() {
            assistant_blocks.push(json!({ "type": "text", "text": turn_text }));
        }
        for call in &tool_calls {
            assistant_blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }
        brain.history().add_assistant_blocks(assistant_blocks);

        // Execute each tool and collect the matching results. TERMINATE_TASK
        // records mission completion but still produces a tool_result so the
        // history stays structurally valid.
        let mut result_blocks: Vec<Value> = Vec::new();
        for call in &tool_calls {
            let result = dispatch_tool(ctx, brain, req, channel, state, &tools, call).await;
            ctx.hub
                .broadcast(
                    brain.user_id.as_str(),
                    event(
                        "llm.tool_use_complete",
                        channel,
                        json!({ "tool_name": call.name, "is_error": result.is_error }),
                    ),
                )
                .await;
            result_blocks.push(json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }
        brain.history().add_tool_results(result_blocks);

        if state.mission_completed {
            return Ok(RunEnd::Complete);
        }
        // Otherwise loop: the provider continues from accumulated history
        // with no new user content.
    }

    warn!(
        thread = %brain.thread_key,
        max_turns = ctx.config.max_turns,
        "workflow hit the turn limit"
    );
    Ok(RunEnd::Complete)
}

enum TurnResult {
    Finished {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    Cancelled,
}

/// Drive one provider stream to completion, fanning deltas out as they
/// arrive.
async fn stream_one_turn(
    ctx: &Arc<WorkflowContext>,
    brain: &Arc<Brain>,
    req: &WorkflowRequest,
    channel: &str,
    cancel: &CancellationToken,
    request: ChatRequest,
) -> Result<TurnResult> {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let provider = Arc::clone(&ctx.provider);
    let send_task = tokio::spawn(async move { provider.send_stream(&request, tx).await });

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut stream_error: Option<String> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                send_task.abort();
                return Ok(TurnResult::Cancelled);
            }
            ev = rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    StreamEvent::TextDelta { text: chunk } => {
                        text.push_str(&chunk);
                        if req.enable_streaming {
                            ctx.hub
                                .broadcast(
                                    brain.user_id.as_str(),
                                    event(
                                        "llm.stream_delta",
                                        channel,
                                        json!({
                                            "message_id": req.assistant_message_id,
                                            "chunk": chunk,
                                        }),
                                    ),
                                )
                                .await;
                        }
                    }
                    StreamEvent::ToolUseStart { name } => {
                        ctx.hub
                            .broadcast(
                                brain.user_id.as_str(),
                                event(
                                    "llm.tool_use_start",
                                    channel,
                                    json!({ "tool_name": name }),
                                ),
                            )
                            .await;
                    }
                    StreamEvent::ToolUse { id, name, input } => {
                        tool_calls.push(ToolCall { id, name, input });
                    }
                    StreamEvent::Done { stop_reason, .. } => {
                        debug!(stop_reason, "turn stream done");
                    }
                    StreamEvent::Error { message } => {
                        stream_error = Some(message);
                    }
                }
            }
        }
    }

    match send_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(BrainError::Provider(e)),
        Err(join_err) if join_err.is_cancelled() => return Ok(TurnResult::Cancelled),
        Err(join_err) => {
            return Err(BrainError::Provider(ProviderError::Unavailable(
                join_err.to_string(),
            )))
        }
    }

    if let Some(message) = stream_error {
        return Err(BrainError::Provider(ProviderError::Unavailable(message)));
    }

    Ok(TurnResult::Finished { text, tool_calls })
}

/// Execute one tool call, applying the workflow's meta semantics.
async fn dispatch_tool(
    ctx: &Arc<WorkflowContext>,
    brain: &Arc<Brain>,
    req: &WorkflowRequest,
    channel: &str,
    state: &mut RunState,
    tools: &[Box<dyn Tool>],
    call: &ToolCall,
) -> crate::tools::ToolResult {
    if call.name == "TERMINATE_TASK" {
        state.mission_completed = true;
        state.terminate_input = call.input.clone();
        if let Some(conclusion) = call.input.get("conclusion").and_then(Value::as_str) {
            if !conclusion.is_empty() {
                if !state.accumulator.is_empty() {
                    state.accumulator.push_str("\n\n");
                }
                state.accumulator.push_str(conclusion);
                if req.enable_streaming {
                    ctx.hub
                        .broadcast(
                            brain.user_id.as_str(),
                            event(
                                "llm.stream_delta",
                                channel,
                                json!({
                                    "message_id": req.assistant_message_id,
                                    "chunk": conclusion,
                                }),
                            ),
                        )
                        .await;
                }
            }
        }
        return execute_tool(tools, &call.name, call.input.clone()).await;
    }

    let result = execute_tool(tools, &call.name, call.input.clone()).await;

    // LPT receipts surface in the visible message so the user knows work is
    // running in the background.
    if kind_of(tools, &call.name) == ToolKind::Long && !result.is_error {
        let title = call
            .input
            .get("task_title")
            .or_else(|| call.input.get("action"))
            .and_then(Value::as_str)
            .unwrap_or(&call.name);
        let notice = format!("\n\n_{} queued — results will follow in this conversation._", title);
        state.accumulator.push_str(&notice);
        if req.enable_streaming {
            ctx.hub
                .broadcast(
                    brain.user_id.as_str(),
                    event(
                        "llm.stream_delta",
                        channel,
                        json!({
                            "message_id": req.assistant_message_id,
                            "chunk": notice,
                        }),
                    ),
                )
                .await;
        }
    }

    result
}

/// §task-execution epilogue: derive and persist the final report, then drop
/// the running-execution marker. One-shot (`NOW`) runs skip persistence.
async fn complete_task_execution(ctx: &Arc<WorkflowContext>, brain: &Arc<Brain>, state: &RunState) {
    let Some(task) = brain.take_active_task() else {
        return;
    };
    if !task.persist_report {
        debug!(task_id = %task.task_id, "one-shot task, skipping report persistence");
        return;
    }

    let report = ExecutionReport::derive(task.checklist.as_ref(), &state.terminate_input, task.started_at);
    if let Err(e) = ctx
        .tools
        .execution_store
        .write_final_report(&task.task_id, &task.execution_id, &report)
        .await
    {
        warn!(task_id = %task.task_id, error = %e, "final report write failed");
    }
    if let Err(e) = ctx
        .tools
        .execution_store
        .clear_running_execution(&task.task_id, &task.execution_id)
        .await
    {
        warn!(task_id = %task.task_id, error = %e, "running-execution cleanup failed");
    }
    info!(
        task_id = %task.task_id,
        execution_id = %task.execution_id,
        status = %report.status,
        steps = format!("{}/{}", report.steps_completed, report.steps_total),
        "task execution report written"
    );
}
