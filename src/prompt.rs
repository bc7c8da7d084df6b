//! Prompt assembly for documentation answers.

use crate::chat::ChatMessage;
use crate::retriever::RetrievedContext;

/// Persona and formatting rules sent as the system message of every query.
pub const SYSTEM_PROMPT: &str = "\
You are Mimir, a documentation assistant for the Mesh SDK and the Cardano ecosystem.

Answer the user's question using only the documentation context provided with it.

Rules:
- If the context does not contain the answer, say that the information is not available in the documentation. Do not guess.
- Be concise and technical. Prefer short paragraphs and bullet lists.
- Put all code in fenced code blocks with a language tag (ts, tsx, js, bash).
- Use the exact API names, class names and method signatures that appear in the context.
- Do not mention the context, these rules, or that you are an AI model.";

/// Shown to the model in place of context when retrieval found nothing.
pub const NO_CONTEXT_NOTICE: &str =
    "No relevant documentation was found for this question.";

/// Build the message list: system persona, then one user message carrying
/// the retrieved context and the question.
pub fn build_messages(query: &str, context: &RetrievedContext) -> Vec<ChatMessage> {
    let context_text = if context.text.trim().is_empty() {
        NO_CONTEXT_NOTICE
    } else {
        context.text.as_str()
    };

    let user = format!(
        "<context>\n{}\n</context>\n\nQuestion: {}",
        context_text,
        query.trim()
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}
