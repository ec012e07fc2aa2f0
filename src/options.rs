/// Knobs for one method analysis. Passed explicitly into `analyze_method`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Emit a `debug!` marker for every rule application.
    pub verbose: bool,
    /// Re-check graph and tree invariants after every structural edit.
    pub check_consistency: bool,
    /// Step budget. `None` scales with the instruction count.
    pub fuel: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            check_consistency: cfg!(debug_assertions),
            fuel: None,
        }
    }
}

impl AnalysisOptions {
    pub fn fuel_for(&self, instruction_count: usize) -> Fuel {
        Fuel::new(
            self.fuel
                .unwrap_or(10_000 + 400 * instruction_count as u64),
        )
    }
}

/// Counts down the reduction and rewriting steps of one method.
#[derive(Clone, Copy, Debug)]
pub struct Fuel {
    remaining: u64,
}

impl Fuel {
    pub fn new(remaining: u64) -> Self {
        Self { remaining }
    }

    /// Consumes one step. Returns `false` once the budget is gone.
    pub fn tick(&mut self) -> bool {
        match self.remaining.checked_sub(1) {
            Some(remaining) => {
                self.remaining = remaining;
                true
            }
            None => false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuel_runs_out() {
        let mut fuel = Fuel::new(2);
        assert!(fuel.tick());
        assert!(fuel.tick());
        assert!(fuel.is_exhausted());
        assert!(!fuel.tick());

        let options = AnalysisOptions {
            fuel: Some(5),
            ..AnalysisOptions::default()
        };
        assert!(!options.fuel_for(1000).is_exhausted());
    }
}
