use crate::classifier::{QuestionClassifier, QuestionLabel};
use crate::core::errors::ApiError;
use crate::generator::{AnswerGenerator, Language};
use crate::llm::TextStream;
use crate::rag::VectorRetriever;
use crate::session::Citation;

/// Trims the question and drops trailing ASCII punctuation. Blank questions
/// are rejected.
pub fn clean_question(question: &str) -> Result<String, ApiError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }
    let cleaned = trimmed.trim_end_matches(|c: char| c.is_ascii_punctuation());
    if cleaned.trim().is_empty() {
        return Ok(trimmed.to_string());
    }
    Ok(cleaned.trim_end().to_string())
}

/// A routed question whose answer is still streaming.
pub struct Answer {
    pub label: QuestionLabel,
    pub language: Language,
    pub stream: TextStream,
    /// Sources of the retrieved context; see [`Answer::citations_for`].
    pub candidate_citations: Vec<Citation>,
}

impl Answer {
    /// Citations to show for the finished `text`. Refusals cite nothing.
    pub fn citations_for(&self, text: &str) -> Vec<Citation> {
        if is_refusal(text, self.language) {
            return Vec::new();
        }
        self.candidate_citations.clone()
    }

    /// Drains the stream.
    pub async fn collect(self) -> Result<CompletedAnswer, ApiError> {
        let Answer {
            label,
            language,
            stream,
            candidate_citations,
        } = self;
        let text = stream.collect_text().await?;
        let citations = if is_refusal(&text, language) {
            Vec::new()
        } else {
            candidate_citations
        };
        Ok(CompletedAnswer {
            label,
            text,
            citations,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompletedAnswer {
    pub label: QuestionLabel,
    pub text: String,
    pub citations: Vec<Citation>,
}

fn is_refusal(text: &str, language: Language) -> bool {
    text.trim().trim_matches('"').trim() == language.refusal()
}

/// The question-answering core. Holds only shared, read-only handles, so one
/// instance serves every session.
pub struct Assistant {
    classifier: QuestionClassifier,
    retriever: VectorRetriever,
    generator: AnswerGenerator,
}

impl Assistant {
    pub fn new(
        classifier: QuestionClassifier,
        retriever: VectorRetriever,
        generator: AnswerGenerator,
    ) -> Self {
        Self {
            classifier,
            retriever,
            generator,
        }
    }

    pub fn retriever(&self) -> &VectorRetriever {
        &self.retriever
    }

    pub async fn classify_and_answer(
        &self,
        question: &str,
        language: Language,
    ) -> Result<Answer, ApiError> {
        let question = clean_question(question)?;
        let label = self.classifier.classify(&question).await;

        let (stream, candidate_citations) = match label {
            QuestionLabel::General => {
                let stream = self.generator.generate_general(&question, language).await?;
                (stream, Vec::new())
            }
            QuestionLabel::Domain => {
                let hits = self.retriever.retrieve_default(&question).await?;
                tracing::info!("Grounding answer on {} retrieved chunks", hits.len());
                let stream = self
                    .generator
                    .generate_grounded(&question, &hits, language)
                    .await?;
                (stream, hits.iter().map(Citation::from_chunk).collect())
            }
        };

        Ok(Answer {
            label,
            language,
            stream,
            candidate_citations,
        })
    }
}
