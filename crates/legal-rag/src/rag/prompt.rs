use crate::error::{RagError, RagResult};

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

/// Grounded legal QA instructions: answer only from the context, admit when
/// the answer is not there.
pub const LEGAL_QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer. \
Keep the answer concise and relevant to the legal context if applicable.

Context: {context}

Question: {question}

Answer:";

/// Prompt text with `{context}` and `{question}` slots.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: LEGAL_QA_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> RagResult<Self> {
        let template = template.into();
        for slot in [CONTEXT_SLOT, QUESTION_SLOT] {
            if !template.contains(slot) {
                return Err(RagError::Config(format!("prompt template is missing {}", slot)));
            }
        }
        Ok(Self { template })
    }

    /// Fill both slots. The question is substituted last so text inside the
    /// context that happens to read `{question}` is left alone.
    pub fn render(&self, context: &str, question: &str) -> String {
        match self.template.split_once(CONTEXT_SLOT) {
            Some((head, tail)) => format!(
                "{}{}{}",
                head.replace(QUESTION_SLOT, question),
                context,
                tail.replace(QUESTION_SLOT, question)
            ),
            None => self.template.replace(QUESTION_SLOT, question),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}
