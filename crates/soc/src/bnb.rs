use crate::errors::{Result, SocError};
use crate::helm::{subset_loss, SocProblem, SubsetLoss};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Ranking of the best measurement subsets of one size
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SizeRanking {
    /// Subset size
    pub size: usize,
    /// Best subsets sorted by ascending worst-case loss
    pub best: Vec<SubsetLoss>,
}

/// Branch-and-bound search of the lowest-loss measurement subsets.
///
/// Candidates are enumerated in lexicographic index order. A partial
/// selection is bounded from below by the loss of its largest superset
/// (the selection plus every remaining measurement): adding measurements
/// never increases the achievable worst-case loss, so when even that
/// superset loses more than the current k-th best, the whole branch is
/// pruned.
pub struct SocEngine {
    problem: SocProblem,
}

impl SocEngine {
    /// Builds the engine after validating the problem shapes.
    pub fn new(problem: SocProblem) -> Result<SocEngine> {
        problem.validate()?;
        Ok(SocEngine { problem })
    }

    /// The validated problem.
    pub fn problem(&self) -> &SocProblem {
        &self.problem
    }

    /// Ranks the `k` best subsets of each requested size by worst-case loss.
    pub fn rank_subsets(&self, sizes: &[usize], k: usize) -> Result<Vec<SizeRanking>> {
        if k == 0 {
            return Err(SocError::InvalidValue(
                "bests_per_size must be at least 1".to_string(),
            ));
        }
        let (n_u, n_y) = (self.problem.n_u(), self.problem.n_y());
        let mut rankings = Vec::with_capacity(sizes.len());
        for &s in sizes {
            if s < n_u || s > n_y {
                return Err(SocError::InvalidValue(format!(
                    "subset size {s} outside [{n_u}, {n_y}]"
                )));
            }
            let total = binomial(n_y, s);
            if k > total {
                warn!("requested {k} best subsets of size {s} but only {total} exist");
            }
            rankings.push(SizeRanking {
                size: s,
                best: self.rank_size(s, k.min(total))?,
            });
        }
        Ok(rankings)
    }

    fn rank_size(&self, s: usize, k: usize) -> Result<Vec<SubsetLoss>> {
        let mut best: Vec<SubsetLoss> = Vec::with_capacity(k + 1);
        let mut prefix = Vec::with_capacity(s);
        let mut evaluated = 0usize;
        let mut pruned = 0usize;
        self.extend(&mut prefix, 0, s, k, &mut best, &mut evaluated, &mut pruned)?;
        debug!("size {s}: {evaluated} subsets evaluated, {pruned} branches pruned");
        Ok(best)
    }

    #[allow(clippy::too_many_arguments)]
    fn extend(
        &self,
        prefix: &mut Vec<usize>,
        start: usize,
        s: usize,
        k: usize,
        best: &mut Vec<SubsetLoss>,
        evaluated: &mut usize,
        pruned: &mut usize,
    ) -> Result<()> {
        let n_y = self.problem.n_y();
        if prefix.len() == s {
            *evaluated += 1;
            let loss = subset_loss(&self.problem, prefix)?;
            let pos = best
                .partition_point(|b| b.worst_case <= loss.worst_case);
            best.insert(pos, loss);
            best.truncate(k);
            return Ok(());
        }

        // Lower bound: the loss of the prefix completed with every
        // remaining measurement, valid by monotonicity of the worst-case
        // loss under measurement addition.
        if best.len() == k && !prefix.is_empty() {
            let mut superset = prefix.clone();
            superset.extend(start..n_y);
            let bound = subset_loss(&self.problem, &superset)?;
            if bound.worst_case >= best[k - 1].worst_case {
                *pruned += 1;
                return Ok(());
            }
        }

        let remaining = s - prefix.len();
        for i in start..=(n_y - remaining) {
            prefix.push(i);
            self.extend(prefix, i + 1, s, k, best, evaluated, pruned)?;
            prefix.pop();
        }
        Ok(())
    }
}

fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut num = 1usize;
    for i in 0..k {
        num = num * (n - i) / (i + 1);
    }
    num
}
