use serde::{Deserialize, Serialize};

/// Counters for every upstream call made during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub api_calls_made: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
}

impl CallStats {
    pub fn record(&mut self, success: bool) {
        self.api_calls_made += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
    }

    /// Success percentage formatted with one decimal, e.g. `"97.5%"`.
    pub fn success_rate(&self) -> String {
        if self.api_calls_made == 0 {
            return "0%".to_string();
        }
        let pct = self.successful_calls as f64 / self.api_calls_made as f64 * 100.0;
        format!("{pct:.1}%")
    }
}
