use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::build_pipeline;
use crate::cli::ReplArgs;
use crate::generation::GenerationProvider;
use crate::pipeline::RagPipeline;
use crate::semantic::EmbeddingProvider;

pub const QUIT_COMMAND: &str = "quit";

pub const EXAMPLE_QUESTIONS: [&str; 2] = [
    "what is the email and username of the userid 938?",
    "waht is the name and description of the catigory id 1?",
];

pub fn run(args: ReplArgs) -> Result<()> {
    let mut pipeline = build_pipeline(&args.pipeline)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let answered = run_session(&mut pipeline, stdin.lock(), &mut stdout.lock())?;

    info!(answered, "session ended");
    Ok(())
}

/// Answers one question per input line until `quit` or end of input. A failed
/// turn is reported and the loop keeps going. Returns the number of answers.
pub fn run_session<E, G, R, W>(
    pipeline: &mut RagPipeline<E, G>,
    input: R,
    output: &mut W,
) -> Result<usize>
where
    E: EmbeddingProvider,
    G: GenerationProvider,
    R: BufRead,
    W: Write,
{
    writeln!(output, "Example questions:")?;
    for question in EXAMPLE_QUESTIONS {
        writeln!(output, "  - {question}")?;
    }

    let mut answered = 0usize;
    let mut lines = input.lines();
    loop {
        write!(output, "\nEnter your question (or '{QUIT_COMMAND}' to exit): ")?;
        output.flush().context("failed to flush prompt")?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read question")?;
        let question = line.trim();
        if question.eq_ignore_ascii_case(QUIT_COMMAND) {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match pipeline.run(question) {
            Ok(turn) => {
                writeln!(output, "\nSQL: {}", turn.sql)?;
                writeln!(output, "Answer: {}", turn.answer.trim())?;
                answered += 1;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "question failed");
                writeln!(output, "\nError: {err:#}")?;
            }
        }
    }

    writeln!(output)?;
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;
    use crate::executor::QueryExecutor;
    use crate::index::{IndexedChunk, VectorIndex};
    use crate::model::SchemaChunk;
    use crate::semantic::LocalHashEmbedder;
    use crate::testing::ScriptedGenerator;

    fn pipeline(replies: &[&str]) -> RagPipeline<LocalHashEmbedder, ScriptedGenerator> {
        let embedder = LocalHashEmbedder::new(64);
        let text = "CREATE TABLE users (user_id INTEGER PRIMARY KEY, email TEXT);".to_string();
        let index = VectorIndex::new(
            embedder.model_id().to_string(),
            embedder.dimensions(),
            String::new(),
            vec![IndexedChunk {
                embedding: embedder.embed(&text).unwrap(),
                chunk: SchemaChunk {
                    ordinal: 0,
                    start: 0,
                    text,
                },
            }],
        );
        let executor = QueryExecutor::new(":memory:", Duration::from_millis(100));
        RagPipeline::new(
            index,
            embedder,
            ScriptedGenerator::new(replies.iter().copied()),
            executor,
        )
    }

    #[test]
    fn session_stops_at_quit() {
        let mut pipeline = pipeline(&["SELECT 1", "It is one."]);
        let mut output = Vec::<u8>::new();

        let answered = run_session(
            &mut pipeline,
            Cursor::new("what is one?\nquit\nnever asked\n"),
            &mut output,
        )
        .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(answered, 1);
        assert!(printed.contains("what is the email and username of the userid 938?"));
        assert!(printed.contains("SQL: SELECT 1"));
        assert!(printed.contains("Answer: It is one."));
        assert_eq!(pipeline.generator().prompts.len(), 2);
    }

    #[test]
    fn failed_turn_is_reported_and_the_loop_continues() {
        // Only one reply: the first turn fails at answer generation.
        let mut pipeline = pipeline(&["SELECT 1"]);
        let mut output = Vec::<u8>::new();

        let answered = run_session(
            &mut pipeline,
            Cursor::new("first\n\nsecond\n"),
            &mut output,
        )
        .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(answered, 0);
        assert_eq!(printed.matches("Error:").count(), 2);
        assert!(printed.contains("answer generation failed"));
        assert!(printed.contains("SQL generation failed"));
    }
}
