//! Terminal rendering of session events.

use async_trait::async_trait;
use colloquy_core::{ChatError, EventSink, Message, ServerEvent};
use std::io::Write;

/// Prints each message once, as conversation snapshots arrive.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
    printed: usize,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One display line for a message, or `None` for messages the user typed.
pub fn format_message(message: &Message) -> Option<String> {
    match message {
        Message::User(_) => None,
        Message::Assistant(m) => {
            let mut parts = Vec::new();
            if !m.content.trim().is_empty() {
                parts.push(m.content.trim().to_string());
            }
            if let Some(call) = &m.tool_call {
                parts.push(format!("[calling {} {}]", call.name, call.input));
            }
            Some(parts.join("\n"))
        }
        Message::Tool(m) => Some(format!("[{} -> {}]", m.tool_name, m.content)),
    }
}

#[async_trait]
impl<W: Write + Send> EventSink for ConsoleSink<W> {
    async fn send(&mut self, event: ServerEvent) -> Result<(), ChatError> {
        match event {
            ServerEvent::Conversation { conversation } => {
                // Replays after a restart start from a fresh sink.
                if conversation.len() < self.printed {
                    self.printed = 0;
                }
                for message in &conversation.messages()[self.printed..] {
                    if let Some(line) = format_message(message) {
                        writeln!(self.out, "{}", line)?;
                    }
                }
                self.printed = conversation.len();
            }
            ServerEvent::Error { error } => writeln!(self.out, "error: {}", error)?,
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::{AssistantMessage, Audience, Conversation, ToolCall, ToolMessage, UserMessage};
    use serde_json::json;

    #[tokio::test]
    async fn test_prints_each_message_once() {
        let mut sink = ConsoleSink::new(Vec::new());
        let mut conversation = Conversation::new("sys");
        conversation.append(UserMessage::new("what is 2+2")).unwrap();
        sink.send(ServerEvent::Conversation {
            conversation: conversation.clone(),
        })
        .await
        .unwrap();

        conversation
            .append(AssistantMessage::new("", "tool_use").with_tool_call(ToolCall {
                id: "call_1".to_string(),
                name: "calculator".to_string(),
                input: json!({"expression": "2+2"}),
            }))
            .unwrap();
        sink.send(ServerEvent::Conversation {
            conversation: conversation.clone(),
        })
        .await
        .unwrap();

        conversation
            .append(ToolMessage::new(
                "calculator",
                None,
                Audience::Assistant,
                json!({"result": "4"}),
                "4",
            ))
            .unwrap();
        conversation
            .append(AssistantMessage::new("It is 4.", "end_turn"))
            .unwrap();
        sink.send(ServerEvent::Conversation { conversation })
            .await
            .unwrap();
        sink.send(ServerEvent::Error {
            error: "boom".to_string(),
        })
        .await
        .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "[calling calculator {\"expression\":\"2+2\"}]\n[calculator -> 4]\nIt is 4.\nerror: boom\n"
        );
    }
}
