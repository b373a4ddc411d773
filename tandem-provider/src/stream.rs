//! Unified streaming event model.
//!
//! Every provider adapter maps its wire format onto [`StreamEvent`]s, so
//! the conversation engine consumes one shape regardless of vendor.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderResult;
use crate::types::{ToolUse, Usage};

/// Events produced while streaming a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart,
    TextDelta {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolUseDelta {
        id: String,
        partial_json: String,
    },
    /// End of one tool-use block. `arguments` is present when the adapter
    /// already assembled the full input; otherwise the accumulator parses
    /// its buffered fragments.
    ToolUseEnd {
        id: String,
        arguments: Option<Value>,
    },
    MessageDelta {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },
    MessageEnd,
    Error {
        message: String,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = ProviderResult<StreamEvent>> + Send>>;

#[derive(Default)]
struct PartialToolUse {
    name: String,
    buffer: String,
    arguments: Option<Value>,
    complete: bool,
}

/// Assembles streamed tool-use fragments into complete [`ToolUse`]s.
///
/// Fragments are buffered per tool-use id; the buffer is parsed when the
/// block ends. An empty or unparseable buffer falls back to `{}` so a
/// malformed stream still yields a callable tool invocation.
#[derive(Default)]
pub struct ToolUseAccumulator {
    order: Vec<String>,
    partial: HashMap<String, PartialToolUse>,
}

impl ToolUseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event through the accumulator.
    pub fn handle(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolUseStart { id, name } => {
                if !self.partial.contains_key(id) {
                    self.order.push(id.clone());
                }
                self.partial.entry(id.clone()).or_default().name = name.clone();
            }
            StreamEvent::ToolUseDelta { id, partial_json } => {
                if let Some(entry) = self.partial.get_mut(id) {
                    entry.buffer.push_str(partial_json);
                } else {
                    tracing::warn!("tool-use delta for unknown id {id}");
                }
            }
            StreamEvent::ToolUseEnd { id, arguments } => {
                if let Some(entry) = self.partial.get_mut(id) {
                    entry.arguments = Some(match arguments {
                        Some(args) => args.clone(),
                        None => parse_arguments(&entry.buffer),
                    });
                    entry.complete = true;
                }
            }
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Completed tool uses, in the order their blocks started.
    pub fn finish(mut self) -> Vec<ToolUse> {
        let mut uses = Vec::with_capacity(self.order.len());
        for id in self.order {
            if let Some(entry) = self.partial.remove(&id) {
                let arguments = match entry.arguments {
                    Some(args) => args,
                    // Stream ended without a ToolUseEnd for this block.
                    None => parse_arguments(&entry.buffer),
                };
                uses.push(ToolUse {
                    id,
                    name: entry.name,
                    arguments,
                });
            }
        }
        uses
    }
}

fn parse_arguments(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(buffer).unwrap_or_else(|e| {
        tracing::warn!("unparseable tool arguments, falling back to empty object: {e}");
        Value::Object(Default::default())
    })
}
