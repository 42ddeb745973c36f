mod queue;
mod worker;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    models::{CodeTemplate, ExecutionLimits, ProblemId, TestCase, Verdict},
    sandbox::{SandboxBackend, SandboxError},
    store::ProblemStore,
};

pub use queue::{JudgeJob, JudgeQueue};
pub use worker::spawn_worker_pool;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JudgeError {
    #[error("compilation failed: {0}")]
    CompileFailure(String),
    #[error("build did not finish within {0:?}")]
    BuildTimeout(Duration),
    #[error("judging unavailable: {0}")]
    Unavailable(String),
    #[error("problem {0} could not be loaded: {1}")]
    ProblemUnavailable(ProblemId, String),
}

impl JudgeError {
    /// Text shown to the submitter. Compiler output is passed through verbatim; infra
    /// failures read as "try again later" rather than as a defect in the code.
    pub fn user_message(&self) -> String {
        match self {
            JudgeError::CompileFailure(output) => {
                format!("Compilation or runtime error: {output}")
            }
            JudgeError::BuildTimeout(limit) => format!(
                "Build did not finish within {}s. Judging may be overloaded, please try again later.",
                limit.as_secs()
            ),
            JudgeError::Unavailable(_) | JudgeError::ProblemUnavailable(..) => {
                "Judging is unavailable right now, please try again later.".to_string()
            }
        }
    }

    pub fn is_code_defect(&self) -> bool {
        matches!(self, JudgeError::CompileFailure(_))
    }
}

impl From<SandboxError> for JudgeError {
    fn from(value: SandboxError) -> Self {
        match value {
            SandboxError::BuildFailure(output) => Self::CompileFailure(output),
            SandboxError::BuildTimeout(limit) => Self::BuildTimeout(limit),
            SandboxError::Unavailable(reason) => Self::Unavailable(reason),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait SubmissionJudge: Send + Sync {
    async fn judge(
        &self,
        problem_id: ProblemId,
        code: &str,
        test_cases: &[TestCase],
    ) -> Result<Verdict, JudgeError>;
}

/// Builds a submission once and runs it against every test case in order.
pub struct Judge {
    sandbox: Arc<dyn SandboxBackend>,
    store: Arc<dyn ProblemStore>,
    build_limits: ExecutionLimits,
    run_limits: ExecutionLimits,
}

impl Judge {
    pub fn new(
        sandbox: Arc<dyn SandboxBackend>,
        store: Arc<dyn ProblemStore>,
        build_limits: ExecutionLimits,
        run_limits: ExecutionLimits,
    ) -> Self {
        Self {
            sandbox,
            store,
            build_limits,
            run_limits,
        }
    }
}

#[async_trait]
impl SubmissionJudge for Judge {
    async fn judge(
        &self,
        problem_id: ProblemId,
        code: &str,
        test_cases: &[TestCase],
    ) -> Result<Verdict, JudgeError> {
        let problem = self
            .store
            .get_problem(problem_id)
            .await
            .map_err(|e| JudgeError::ProblemUnavailable(problem_id, e.to_string()))?;
        let source = assemble_source(&problem.template, code);

        let artifact = self.sandbox.build(&source, &self.build_limits).await?;

        let mut verdict = Verdict {
            passed: 0,
            total: test_cases.len(),
            failed_cases: Vec::new(),
        };
        let mut unavailable = 0;
        for (idx, case) in test_cases.iter().enumerate() {
            let case_no = idx + 1;
            match self.sandbox.run(&artifact, &case.input, &self.run_limits).await {
                Ok(stdout) if outputs_match(&stdout, &case.expected_output) => verdict.passed += 1,
                Ok(_) => verdict.failed_cases.push(case_no),
                Err(err) => {
                    if matches!(err, SandboxError::Unavailable(_)) {
                        unavailable += 1;
                    }
                    tracing::debug!(problem_id, case = case_no, error = %err, "test case failed to run");
                    verdict.failed_cases.push(case_no);
                }
            }
        }

        // Every case failing for lack of a sandbox says nothing about the code.
        if unavailable > 0 && unavailable == test_cases.len() {
            return Err(JudgeError::Unavailable(format!(
                "{} backend could not run any test case",
                self.sandbox.name()
            )));
        }
        Ok(verdict)
    }
}

/// The judged translation unit: header, then the submitted fragment, then the driver.
pub fn assemble_source(template: &CodeTemplate, code: &str) -> String {
    format!("{}\n{}\n{}", template.header, code, template.driver)
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}
