use lab_judge::agent::{KnowledgeBase, StaticProblemSource, TemplateGenerator};
use lab_judge::config::{IsolationMode, PipelineConfig};
use lab_judge::policy::MemoryAttemptStore;
use lab_judge::runner::SandboxRunner;
use lab_judge::{
    Difficulty, Language, Pipeline, ProblemSpec, SubmitRequest, TestCase,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lab_judge=info".into()),
        )
        .init();

    println!("Lab Judge Engine v0.1.0");
    println!("=======================");

    let config = PipelineConfig {
        isolation: IsolationMode::Host,
        ..PipelineConfig::default()
    };

    if let Err(e) = SandboxRunner::check_environment(&config) {
        eprintln!("Environment check failed: {e}");
        eprintln!("Please ensure the language toolchains are installed and in PATH");
        return Ok(());
    }
    println!("Environment check passed");

    let example_problem = ProblemSpec {
        id: "double-1".to_string(),
        title: "Double the Number".to_string(),
        description: "Read a number and output its double".to_string(),
        difficulty: Difficulty::Easy,
        sample_cases: vec![TestCase {
            input: "2\n".to_string(),
            expected_output: "4\n".to_string(),
        }],
        hidden_cases: vec![
            TestCase {
                input: "5\n".to_string(),
                expected_output: "10\n".to_string(),
            },
            TestCase {
                input: "10\n".to_string(),
                expected_output: "20\n".to_string(),
            },
        ],
        time_limit_ms: 1000,
        memory_limit_mb: 64,
        cpu_share: 0.5,
    };

    let pipeline = Pipeline::new(
        config,
        Arc::new(StaticProblemSource::new(vec![example_problem])),
        Arc::new(KnowledgeBase::builtin()),
        Arc::new(TemplateGenerator),
        Arc::new(MemoryAttemptStore::new()),
    );

    let request = SubmitRequest {
        user_id: "demo-student".to_string(),
        problem_id: "double-1".to_string(),
        language: Language::Python,
        code: "n = int(input())\nprint(n * 2)\n".to_string(),
    };

    let response = pipeline.submit(request).await;

    println!("\nJudge Result:");
    println!("=============");
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
