use serde::{Deserialize, Serialize};

pub type ProblemId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Public sample shown alongside the description; never judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub expected_output: String,
}

/// Source surrounding the participant's fragment. The judged translation unit is
/// `header`, then the submitted code, then `driver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTemplate {
    pub header: String,
    pub user_stub: String,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    pub test_cases: Vec<TestCase>,
    pub template: CodeTemplate,
}

/// What a participant is shown when a match starts. Hidden test cases stay on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemView {
    pub id: ProblemId,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub examples: Vec<Example>,
    pub template: CodeTemplate,
}

impl From<&Problem> for ProblemView {
    fn from(problem: &Problem) -> Self {
        Self {
            id: problem.id,
            title: problem.title.clone(),
            description: problem.description.clone(),
            difficulty: problem.difficulty.clone(),
            examples: problem.examples.clone(),
            template: problem.template.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: usize,
    pub total: usize,
    /// 1-based indices of the failing test cases, in input order.
    pub failed_cases: Vec<usize>,
}

impl Verdict {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub cpu_cores: f32,
    pub memory_mb: u64,
    pub timeout_ms: u64,
    pub max_processes: u64,
    pub max_output_bytes: usize,
}

impl ExecutionLimits {
    pub fn normalized(mut self) -> Self {
        self.cpu_cores = self.cpu_cores.clamp(0.1, 4.0);
        self.memory_mb = self.memory_mb.clamp(32, 8192);
        self.timeout_ms = self.timeout_ms.clamp(50, 120_000);
        self.max_processes = self.max_processes.clamp(1, 256);
        self.max_output_bytes = self.max_output_bytes.clamp(1024, 4 * 1024 * 1024);
        self
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionLimits, Verdict};

    #[test]
    fn normalizes_limits_to_safe_bounds() {
        let normalized = ExecutionLimits {
            cpu_cores: 0.01,
            memory_mb: 1,
            timeout_ms: 1,
            max_processes: 999,
            max_output_bytes: 99_000_000,
        }
        .normalized();

        assert_eq!(normalized.cpu_cores, 0.1);
        assert_eq!(normalized.memory_mb, 32);
        assert_eq!(normalized.timeout_ms, 50);
        assert_eq!(normalized.max_processes, 256);
        assert_eq!(normalized.max_output_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn verdict_serializes_failed_cases_in_snake_case() {
        let verdict = Verdict {
            passed: 1,
            total: 2,
            failed_cases: vec![2],
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["failed_cases"], serde_json::json!([2]));
        assert!(!verdict.all_passed());
    }
}
