//! Prompt context assembly.
//!
//! The assembled context is the selected history followed by one named
//! system directive telling the model to answer the next message with that
//! history in mind. The caller appends the user message itself.

use crate::context::selector::HistorySelector;
use chatrecall_core::error::Result;
use chatrecall_core::message::Message;
use std::sync::Arc;

/// Directive appended after the selected history.
pub const CONTEXT_DIRECTIVE: &str = "Considering the previous messages, answer the next message:";

pub struct ContextAssembler {
    selector: Arc<dyn HistorySelector>,
    assistant_name: String,
}

impl ContextAssembler {
    pub fn new(selector: Arc<dyn HistorySelector>, assistant_name: impl Into<String>) -> Self {
        Self {
            selector,
            assistant_name: assistant_name.into(),
        }
    }

    pub fn selector(&self) -> &Arc<dyn HistorySelector> {
        &self.selector
    }

    pub fn directive(&self) -> Message {
        Message::system(CONTEXT_DIRECTIVE).with_name(self.assistant_name.clone())
    }

    /// Context messages for `msg`: relevant history, then the directive.
    pub async fn assemble(&self, msg: &Message) -> Result<Vec<Message>> {
        let mut context = self.selector.select_relevant_history(msg).await?;
        context.push(self.directive());
        Ok(context)
    }
}
