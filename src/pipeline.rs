use std::time::Instant;

use anyhow::Result;
use tracing::info;

use crate::cli::SqlDialect;
use crate::executor::QueryExecutor;
use crate::generation::{GenerationProvider, SamplingConfig};
use crate::index::VectorIndex;
use crate::model::PipelineTurn;
use crate::retrieval::{DEFAULT_TOP_K, retrieve};
use crate::semantic::EmbeddingProvider;
use crate::synthesis::{synthesize_answer, synthesize_sql};

/// Owns the loaded index and both model sessions for the life of the process.
///
/// Stages always run in the same order: retrieve, generate SQL, execute,
/// generate the answer. A failed query is not a pipeline error; it is handed
/// to the answer stage like any other outcome.
pub struct RagPipeline<E, G> {
    index: VectorIndex,
    embedder: E,
    generator: G,
    executor: QueryExecutor,
    top_k: usize,
    dialect: SqlDialect,
    sampling: SamplingConfig,
}

impl<E, G> RagPipeline<E, G>
where
    E: EmbeddingProvider,
    G: GenerationProvider,
{
    pub fn new(index: VectorIndex, embedder: E, generator: G, executor: QueryExecutor) -> Self {
        Self {
            index,
            embedder,
            generator,
            executor,
            top_k: DEFAULT_TOP_K,
            dialect: SqlDialect::Sqlite,
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[cfg(test)]
    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn answer(&mut self, question: &str) -> Result<String> {
        Ok(self.run(question)?.answer)
    }

    pub fn run(&mut self, question: &str) -> Result<PipelineTurn> {
        let started = Instant::now();

        let retrieval = retrieve(&self.index, &self.embedder, question, self.top_k)?;
        let sql = synthesize_sql(
            &mut self.generator,
            question,
            &retrieval,
            self.dialect,
            &self.sampling,
        )?;
        let outcome = self.executor.execute(sql.as_str());
        let answer = synthesize_answer(
            &mut self.generator,
            question,
            &sql,
            &outcome,
            &self.sampling,
        )?;

        let duration_ms = started.elapsed().as_millis();
        info!(
            model_id = %self.generator.model_id(),
            retrieved = retrieval.len(),
            chunks = ?retrieval.ordinals(),
            outcome = outcome.kind(),
            duration_ms,
            "question answered"
        );

        Ok(PipelineTurn {
            question: question.to_string(),
            retrieval,
            sql,
            outcome,
            answer,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::*;
    use crate::index::{IndexOptions, build_or_load_index};
    use crate::model::QueryOutcome;
    use crate::testing::{CountingEmbedder, SAMPLE_SCHEMA, ScriptedGenerator};

    struct Fixture {
        _dir: TempDir,
        index: VectorIndex,
        executor: QueryExecutor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shop.sqlite");
        let connection = Connection::open(&db_path).unwrap();
        connection
            .execute_batch(
                "
                CREATE TABLE users (user_id INTEGER PRIMARY KEY, username TEXT, email TEXT);
                INSERT INTO users VALUES (938, 'alice', 'alice@example.com');
                ",
            )
            .unwrap();
        drop(connection);

        let options = IndexOptions::new(dir.path().join("index"));
        let index = build_or_load_index(SAMPLE_SCHEMA, &options, &CountingEmbedder::new()).unwrap();
        let executor = QueryExecutor::new(
            &format!("sqlite://{}", db_path.display()),
            Duration::from_millis(500),
        );

        Fixture {
            _dir: dir,
            index,
            executor,
        }
    }

    #[test]
    fn user_lookup_flows_from_question_to_answer() {
        let fixture = fixture();
        let generator = ScriptedGenerator::new([
            "```sql\nSELECT username, email FROM users WHERE user_id = 938;\n```",
            "User 938 is alice and their email is alice@example.com.",
        ]);
        let mut pipeline = RagPipeline::new(
            fixture.index,
            CountingEmbedder::new(),
            generator,
            fixture.executor,
        );

        let turn = pipeline
            .run("what is the email and username of the userid 938?")
            .unwrap();

        let sql = turn.sql.as_str();
        assert!(sql.contains("users") && sql.contains("username") && sql.contains("email"));
        assert!(sql.contains("WHERE user_id = 938"));
        assert_eq!(
            turn.outcome,
            QueryOutcome::Rows {
                columns: vec!["username".to_string(), "email".to_string()],
                rows: vec!["('alice', 'alice@example.com')".to_string()],
            }
        );
        assert!(turn.answer.contains("alice") && turn.answer.contains("alice@example.com"));
        assert!(!turn.retrieval.is_empty() && turn.retrieval.len() <= DEFAULT_TOP_K);

        let prompts = &pipeline.generator().prompts;
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("what is the email and username of the userid 938?"));
        assert!(prompts[1].contains("Query Results: Results:\n('alice', 'alice@example.com')"));
    }

    #[test]
    fn failed_query_still_produces_an_answer() {
        let fixture = fixture();
        let generator = ScriptedGenerator::new([
            "SELECT nickname FROM users WHERE user_id = 938;",
            "The query failed because the column nickname does not exist.",
        ]);
        let mut pipeline = RagPipeline::new(
            fixture.index,
            CountingEmbedder::new(),
            generator,
            fixture.executor,
        );

        let turn = pipeline.run("what is the nickname of user 938?").unwrap();

        assert!(turn.outcome.is_failure());
        assert!(turn.answer.contains("does not exist"));
        let prompts = &pipeline.generator().prompts;
        assert!(prompts[1].contains("Error executing query: no such column: nickname"));
    }

    #[test]
    fn answer_returns_only_the_final_text() {
        let fixture = fixture();
        let generator = ScriptedGenerator::new(["SELECT 1", "One."]);
        let mut pipeline = RagPipeline::new(
            fixture.index,
            CountingEmbedder::new(),
            generator,
            fixture.executor,
        )
        .with_top_k(1);

        assert_eq!(pipeline.answer("one?").unwrap(), "One.");
    }

    #[test]
    fn generation_errors_propagate() {
        let fixture = fixture();
        let mut pipeline = RagPipeline::new(
            fixture.index,
            CountingEmbedder::new(),
            ScriptedGenerator::new(Vec::<String>::new()),
            fixture.executor,
        );

        let err = pipeline.run("anything").unwrap_err();
        assert!(format!("{err:#}").contains("SQL generation failed"));
    }
}
