//! Prompt templates for question and summary generation.
//!
//! Both prompts demand a single JSON object so the response can be parsed
//! strictly; anything else fails validation rather than producing a
//! half-usable quiz.

pub const QUESTION_SYSTEM: &str = "You are an expert educator writing exam questions from \
lecture material. Respond with a single JSON object and nothing else. The object must have \
the form {\"questions\": [{\"question\": string, \"choices\": [string, string, string, string], \
\"answer_index\": integer, \"explanation\": string, \"source_ref\": string or null}]}. \
Every question has exactly 4 choices. answer_index is zero-based, between 0 and 3, and marks \
the single correct choice. explanation briefly states why the answer is correct. source_ref \
names the page, slide, or passage the question is drawn from when known, else null.";

pub fn question_user(title: &str, count: usize, context: &str) -> String {
    format!(
        "Write exactly {count} multiple-choice questions testing understanding of the \
         following material from \"{title}\". Cover distinct concepts; do not repeat a \
         question. Base every question strictly on the material below.\n\n\
         MATERIAL:\n{context}"
    )
}

pub const SUMMARY_SYSTEM: &str = "You are an expert educator summarizing lecture material \
for study. Respond with a single JSON object and nothing else, of the form \
{\"sections\": [{\"title\": string, \"points\": [string]}]}. Each section covers one major \
topic; each point is one concise factual statement from the material.";

pub fn summary_user(title: &str, text: &str) -> String {
    format!(
        "Summarize the following material from \"{title}\" into 3 to 6 sections of key \
         points a student should retain.\n\nMATERIAL:\n{text}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompts_carry_their_inputs() {
        let q = question_user("Week 3: Glycolysis", 8, "chunk text");
        assert!(q.contains("exactly 8"));
        assert!(q.contains("Week 3: Glycolysis"));
        assert!(q.contains("chunk text"));

        let s = summary_user("Week 3", "body");
        assert!(s.contains("Week 3"));
        assert!(s.ends_with("body"));
    }
}
