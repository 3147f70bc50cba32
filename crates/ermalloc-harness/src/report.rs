//! Report generation for harness runs.

use serde::{Deserialize, Serialize};

use crate::scenario::ScenarioResult;
use crate::stress::StressSummary;

/// Scenario results and an optional stress summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    /// Report title.
    pub title: String,
    /// Heap mode the run used.
    pub mode: String,
    /// Seconds since the Unix epoch.
    pub timestamp: String,
    pub scenarios: Vec<ScenarioResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stress: Option<StressSummary>,
}

impl HarnessReport {
    /// Number of failed scenarios.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|r| !r.passed).count()
    }

    /// True when every scenario passed and the stress run (if any) was clean.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed() == 0 && self.stress.as_ref().is_none_or(StressSummary::is_clean)
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Mode: {}\n", self.mode));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        if !self.scenarios.is_empty() {
            out.push_str(&format!("- Scenarios: {}\n", self.scenarios.len()));
            out.push_str(&format!("- Failed: {}\n\n", self.failed()));
            out.push_str("| Scenario | Policies | Faults | Status | Expected | Intact | Result |\n");
            out.push_str("|----------|----------|--------|--------|----------|--------|--------|\n");
            for r in &self.scenarios {
                let result = if r.passed { "PASS" } else { "FAIL" };
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} |\n",
                    r.name, r.policies, r.faults, r.status, r.expected_status, r.intact, result
                ));
            }
        }
        if let Some(stress) = &self.stress {
            out.push_str("\n## Stress\n\n");
            out.push_str(&format!("- Allocations: {}\n", stress.allocations));
            out.push_str(&format!("- Injected faults: {}\n", stress.injected));
            out.push_str(&format!("- Enforcements: {}\n", stress.enforcements));
            out.push_str(&format!("- Corrected: {}\n", stress.corrected));
            out.push_str(&format!("- Unrecoverable: {}\n", stress.unrecoverable));
            out.push_str(&format!("- Violations: {}\n", stress.violations));
            out.push_str(&format!("- Live blocks: {}\n", stress.live_blocks));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
