//! Grounded prompt assembly.

use crate::models::RetrievedChunk;

/// Build the answer prompt: instructions, the retrieved chunk texts joined by
/// a blank line in rank order, the question, and the "I don't know" directive.
pub fn assemble(query: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an intelligent assistant. Answer the question below based **only** on the provided context.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {query}\n\
         \n\
         If the answer is not in the context, say \"I don't know.\"\n\
         \n\
         Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "id".into(),
            document: "doc.txt".into(),
            chunk_index: 0,
            text: text.into(),
            score,
        }
    }

    #[test]
    fn exact_template() {
        let prompt = assemble("What is X?", &[hit("X is a protocol.", 0.9), hit("Y is not.", 0.1)]);
        assert_eq!(
            prompt,
            "You are an intelligent assistant. Answer the question below based **only** on the provided context.\n\
             \n\
             Context:\n\
             X is a protocol.\n\
             \n\
             Y is not.\n\
             \n\
             Question: What is X?\n\
             \n\
             If the answer is not in the context, say \"I don't know.\"\n\
             \n\
             Answer:"
        );
    }

    #[test]
    fn empty_context_keeps_structure() {
        let prompt = assemble("Anything?", &[]);
        assert!(prompt.contains("Context:\n\n\nQuestion: Anything?"));
        assert!(prompt.ends_with("Answer:"));
    }
}
