use crate::traits::AnswerProvider;
use tracing::debug;

/// Minimum number of meaningful characters after trailing markers are removed.
pub const MIN_QUESTION_CHARS: usize = 2;

/// Questions at or below this length are escalated to the classifier when one
/// is available.
const BORDERLINE_CHARS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admissibility {
    Accepted,
    Rejected { reason: String },
}

/// Length- and content-based screening. Rejected questions must never reach
/// retrieval.
pub fn screen_by_length(question: &str) -> Admissibility {
    let stripped = strip_trailing_markers(question.trim());

    if stripped.is_empty() {
        return Admissibility::Rejected {
            reason: "the question is empty".to_string(),
        };
    }

    if stripped.chars().count() < MIN_QUESTION_CHARS {
        return Admissibility::Rejected {
            reason: "the question is too short".to_string(),
        };
    }

    if stripped.chars().all(is_punctuation_or_space) {
        return Admissibility::Rejected {
            reason: "the question contains only punctuation".to_string(),
        };
    }

    Admissibility::Accepted
}

/// Full screening: the length rule first, then an optional model
/// classification for borderline lengths. A classifier failure falls back to
/// the length-based verdict.
pub async fn screen(question: &str, classifier: Option<&dyn AnswerProvider>) -> Admissibility {
    let verdict = screen_by_length(question);
    if matches!(verdict, Admissibility::Rejected { .. }) {
        return verdict;
    }

    let borderline = question.trim().chars().count() <= BORDERLINE_CHARS;
    if !borderline {
        return Admissibility::Accepted;
    }

    let Some(classifier) = classifier else {
        return Admissibility::Accepted;
    };

    let prompt = format!(
        "Is the following text a meaningful question that could be answered from a document?\n\
         Reply with exactly \"yes\" or \"no\".\n\nText: {question}"
    );

    match classifier.complete(&prompt).await {
        Ok(reply) if reply.trim().to_lowercase().starts_with("no") => Admissibility::Rejected {
            reason: "the question could not be understood".to_string(),
        },
        Ok(_) => Admissibility::Accepted,
        Err(error) => {
            debug!(%error, "question classifier unavailable, keeping length verdict");
            Admissibility::Accepted
        }
    }
}

fn strip_trailing_markers(question: &str) -> &str {
    question.trim_end_matches(|c: char| {
        matches!(c, '?' | '？' | '.' | '!' | '！' | '。' | ',' | ' ')
    })
}

fn is_punctuation_or_space(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation() || matches!(c, '？' | '！' | '。' | '、' | '…')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;

    struct FakeClassifier {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl AnswerProvider for FakeClassifier {
        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => Err(ProviderError::Status {
                    provider: "fake".to_string(),
                    status: "503".to_string(),
                }),
            }
        }
    }

    #[test]
    fn punctuation_only_question_is_rejected() {
        assert!(matches!(
            screen_by_length("?"),
            Admissibility::Rejected { .. }
        ));
    }

    #[test]
    fn empty_and_whitespace_questions_are_rejected() {
        assert!(matches!(screen_by_length(""), Admissibility::Rejected { .. }));
        assert!(matches!(
            screen_by_length("   "),
            Admissibility::Rejected { .. }
        ));
    }

    #[test]
    fn symbol_soup_is_rejected() {
        assert!(matches!(
            screen_by_length("!!! ... ???"),
            Admissibility::Rejected { .. }
        ));
    }

    #[test]
    fn ordinary_question_is_accepted() {
        assert_eq!(
            screen_by_length("What is the refund policy?"),
            Admissibility::Accepted
        );
    }

    #[tokio::test]
    async fn classifier_rejection_applies_to_borderline_questions() {
        let classifier = FakeClassifier { reply: Some("no") };
        let verdict = screen("asdf?", Some(&classifier)).await;
        assert!(matches!(verdict, Admissibility::Rejected { .. }));
    }

    #[tokio::test]
    async fn classifier_failure_falls_back_to_length_rule() {
        let classifier = FakeClassifier { reply: None };
        let verdict = screen("why so?", Some(&classifier)).await;
        assert_eq!(verdict, Admissibility::Accepted);
    }

    #[tokio::test]
    async fn long_questions_skip_the_classifier() {
        let classifier = FakeClassifier { reply: Some("no") };
        let verdict = screen(
            "What are the warranty conditions for this product?",
            Some(&classifier),
        )
        .await;
        assert_eq!(verdict, Admissibility::Accepted);
    }
}
