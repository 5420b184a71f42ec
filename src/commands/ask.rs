use anyhow::{Context, Result};
use tracing::info;

use super::build_pipeline;
use crate::cli::AskArgs;

pub fn run(args: AskArgs) -> Result<()> {
    let mut pipeline = build_pipeline(&args.pipeline)?;

    info!(question = %args.question, "question received");
    if args.json {
        let turn = pipeline.run(&args.question)?;
        let payload =
            serde_json::to_string_pretty(&turn).context("failed to serialize pipeline turn")?;
        println!("{payload}");
    } else {
        let answer = pipeline.answer(&args.question)?;
        println!("{}", answer.trim());
    }

    Ok(())
}
