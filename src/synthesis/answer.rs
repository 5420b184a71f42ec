use anyhow::{Context, Result};
use tracing::debug;

use crate::generation::{GenerationProvider, SamplingConfig};
use crate::model::{QueryOutcome, SqlCandidate};

pub fn build_answer_prompt(question: &str, sql: &SqlCandidate, outcome: &QueryOutcome) -> String {
    format!(
        "Based on the following SQL query results, provide a natural language answer to the original question.\n\n\
         Question: {question}\n\
         SQL Query: {sql}\n\
         Query Results: {results}\n\n\
         Answer:",
        results = outcome.render()
    )
}

/// Returns the model output unchanged, including for failed queries where the
/// model is expected to explain the error.
pub fn synthesize_answer<G>(
    generator: &mut G,
    question: &str,
    sql: &SqlCandidate,
    outcome: &QueryOutcome,
    sampling: &SamplingConfig,
) -> Result<String>
where
    G: GenerationProvider + ?Sized,
{
    let prompt = build_answer_prompt(question, sql, outcome);
    let answer = generator
        .generate(&prompt, sampling)
        .context("answer generation failed")?;

    debug!(chars = answer.chars().count(), "answer generated");
    Ok(answer)
}
