//! Pre-answer check for questions that lack the details needed to answer.

use crate::llm::ChatMessage;
use crate::rag::ScoredChunk;

pub const ASSESSMENT_PROMPT: &str = r#"You review questions sent to a product-manual assistant. Decide whether the question, together with the manual excerpts provided, carries enough detail to be answered precisely.

Reply in exactly this format and nothing else:
SUFFICIENT: true or false
MISSING_INFO: <what is missing, or none>
QUESTIONS: <one short question to the user per line>

Only mark the question as insufficient when the answer genuinely depends on a detail the user did not give, such as the model number or the feature being asked about."#;

/// Answers that asked the user for more detail start with this line.
pub const CLARIFICATION_PREFIX: &str = "I need a bit more information to answer accurately.";

#[derive(Debug, Clone, PartialEq)]
pub enum QueryAssessment {
    Answer,
    NeedsClarification {
        missing: String,
        questions: Vec<String>,
    },
}

pub fn assessment_messages(query: &str, context: &[ScoredChunk]) -> Vec<ChatMessage> {
    let excerpts: Vec<String> = context
        .iter()
        .map(|scored| format!("[{}] {}", scored.chunk.title, scored.chunk.snippet))
        .collect();
    let excerpts = if excerpts.is_empty() {
        "(none)".to_string()
    } else {
        excerpts.join("\n")
    };
    vec![ChatMessage::user(format!(
        "Question: {}\n\nManual excerpts:\n{}",
        query, excerpts
    ))]
}

/// Parses the assessment reply. Anything that is not a well-formed
/// insufficient verdict means the question gets answered.
pub fn parse_assessment(reply: &str) -> QueryAssessment {
    if reply.to_ascii_uppercase().contains("SUFFICIENT: TRUE") {
        return QueryAssessment::Answer;
    }

    let Some(missing_at) = reply.find("MISSING_INFO:") else {
        return QueryAssessment::Answer;
    };
    let Some(questions_at) = reply.find("QUESTIONS:") else {
        return QueryAssessment::Answer;
    };
    if questions_at < missing_at {
        return QueryAssessment::Answer;
    }

    let missing = reply[missing_at + "MISSING_INFO:".len()..questions_at]
        .trim()
        .to_string();
    let questions: Vec<String> = reply[questions_at + "QUESTIONS:".len()..]
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if questions.is_empty() {
        return QueryAssessment::Answer;
    }
    QueryAssessment::NeedsClarification { missing, questions }
}

/// Text stored as the answer of a clarification turn.
pub fn clarification_text(missing: &str, questions: &[String]) -> String {
    let mut text = String::from(CLARIFICATION_PREFIX);
    if !missing.is_empty() && !missing.eq_ignore_ascii_case("none") {
        text.push_str("\n\nMissing: ");
        text.push_str(missing);
    }
    for question in questions {
        text.push_str("\n- ");
        text.push_str(question);
    }
    text
}

/// Folds the user's reply to a clarification into the question it was asked for.
pub fn combine_with_pending(pending_question: &str, message: &str) -> String {
    format!(
        "Original question: {}\nAdditional information: {}",
        pending_question, message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sufficient_reply_answers() {
        assert_eq!(
            parse_assessment("SUFFICIENT: true\nMISSING_INFO: none\nQUESTIONS:"),
            QueryAssessment::Answer
        );
        assert_eq!(parse_assessment("sufficient: True"), QueryAssessment::Answer);
    }

    #[test]
    fn insufficient_reply_yields_questions() {
        let reply = "SUFFICIENT: false\nMISSING_INFO: model number\nQUESTIONS:\n- Which model do you have?\n- Which OS version?";
        assert_eq!(
            parse_assessment(reply),
            QueryAssessment::NeedsClarification {
                missing: "model number".to_string(),
                questions: vec![
                    "Which model do you have?".to_string(),
                    "Which OS version?".to_string()
                ],
            }
        );
    }

    #[test]
    fn malformed_reply_defaults_to_answer() {
        assert_eq!(parse_assessment("I think it's fine"), QueryAssessment::Answer);
        assert_eq!(
            parse_assessment("SUFFICIENT: false\nQUESTIONS: which?"),
            QueryAssessment::Answer
        );
        assert_eq!(
            parse_assessment("SUFFICIENT: false\nMISSING_INFO: x\nQUESTIONS:\n"),
            QueryAssessment::Answer
        );
    }

    #[test]
    fn clarification_text_starts_with_prefix() {
        let text = clarification_text("model number", &["Which model?".to_string()]);
        assert!(text.starts_with(CLARIFICATION_PREFIX));
        assert!(text.ends_with("- Which model?"));
        assert!(!clarification_text("none", &[]).contains("Missing"));
    }
}
