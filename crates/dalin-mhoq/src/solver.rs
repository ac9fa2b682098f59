//! Finite-horizon integer least-squares solvers.
//!
//! Each step of the moving-horizon quantizer asks for a decision vector `v`, every entry of which
//! is picked from a finite [`CandidateSet`], minimizing `‖Γ v − t‖²`. `Γ` is the lower-triangular
//! Toeplitz matrix of the plant impulse response, so row `j` of the residual only depends on the
//! decisions up to `j`. Solvers assign decisions in order and accumulate the cost of the rows that
//! become fully determined along the way.
use nalgebra::{DMatrix, DVector};

/// Finite set of values a decision can take. The position of a value in the set is the code it
/// stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    values: Vec<f64>,
    order: Vec<usize>,
}

impl CandidateSet {
    /// Create a candidate set from the value of each code.
    pub fn new(values: Vec<f64>) -> Self {
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]).then(i.cmp(&j)));
        Self { values, order }
    }

    /// Candidate set `0, 1, ..., count - 1`, where each code stands for itself.
    pub fn uniform(count: usize) -> Self {
        Self::new((0..count).map(|i| i as f64).collect())
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set has no candidates
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of each code
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterate over the codes by increasing distance of their value to `target`. When two values
    /// are equally distant, the larger one comes first.
    pub fn nearest(&self, target: f64) -> NearestFirst<'_> {
        let split = self.order.partition_point(|&i| self.values[i] < target);
        NearestFirst {
            set: self,
            target,
            below: split,
            above: split,
        }
    }
}

/// Iterator returned by [`CandidateSet::nearest`].
#[derive(Debug, Clone)]
pub struct NearestFirst<'a> {
    set: &'a CandidateSet,
    target: f64,
    below: usize,
    above: usize,
}

impl Iterator for NearestFirst<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let CandidateSet { values, order } = self.set;
        let take_above = match (self.below.checked_sub(1), order.get(self.above)) {
            (None, None) => return None,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(lo), Some(&hi)) => values[hi] - self.target <= self.target - values[order[lo]],
        };
        if take_above {
            self.above += 1;
            Some(order[self.above - 1])
        } else {
            self.below -= 1;
            Some(order[self.below])
        }
    }
}

/// One finite-horizon problem: minimize `‖Γ v − t‖²` over `v`, with every `v_k` taken from the
/// candidate set.
#[derive(Debug, Copy, Clone)]
pub struct HorizonProblem<'a> {
    /// Lower-triangular prediction matrix `Γ`
    pub gamma: &'a DMatrix<f64>,
    /// Target vector `t`
    pub target: &'a DVector<f64>,
    /// Preferred value of each decision, used to order candidates that have no immediate effect
    /// on the cost
    pub hint: &'a [f64],
    /// Values available to each decision
    pub candidates: &'a CandidateSet,
}

impl HorizonProblem<'_> {
    /// Number of decisions
    pub fn horizon(&self) -> usize {
        self.target.len()
    }

    /// Cost of a decision vector, given as codes.
    pub fn cost(&self, codes: &[u32]) -> f64 {
        let v = DVector::from_iterator(
            codes.len(),
            codes.iter().map(|&c| self.candidates.values[c as usize]),
        );
        (self.gamma * v - self.target).norm_squared()
    }

    fn is_finite(&self) -> bool {
        self.gamma.iter().chain(self.target.iter()).all(|x| x.is_finite())
    }
}

/// Solution of a [`HorizonProblem`]
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonSolution {
    /// Code of every decision over the horizon
    pub codes: Vec<u32>,
    /// Cost `‖Γ v − t‖²` of the decisions
    pub cost: f64,
}

/// Solver for the per-step problem of the moving-horizon quantizer.
pub trait HorizonSolver {
    /// Solve the problem, returning `None` when no decision vector with a finite cost was found.
    fn solve(&self, problem: &HorizonProblem) -> Option<HorizonSolution>;
}

/// Sequential nearest choice: every decision takes the candidate minimizing the cost of the rows
/// it completes, without revisiting earlier decisions.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Greedy;

impl HorizonSolver for Greedy {
    fn solve(&self, problem: &HorizonProblem) -> Option<HorizonSolution> {
        if problem.candidates.is_empty() || !problem.is_finite() {
            return None;
        }
        let mut search = Search::new(problem);
        let mut cost = search.constant;
        for k in 0..problem.horizon() {
            let rows = search.completed_rows(k);
            let code = problem.candidates.nearest(center(&rows, problem.hint, k)).next()?;
            let value = problem.candidates.values[code];
            cost += row_cost(&rows, value);
            search.values.push(value);
            search.codes.push(code as u32);
        }
        cost.is_finite().then_some(HorizonSolution {
            codes: search.codes,
            cost,
        })
    }
}

/// Exact depth-first branch and bound.
///
/// Decisions are assigned in order, trying candidates by increasing distance to the minimizer of
/// the rows they complete. Since the cost of those rows is a convex quadratic in the decision,
/// the remaining candidates of a node are pruned as soon as one exceeds the best cost found so
/// far. The search starts from the [`Greedy`] solution.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BranchAndBound {
    node_limit: Option<usize>,
}

impl BranchAndBound {
    /// Exact solver without a node limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the search after visiting `limit` nodes, returning the best solution found so far.
    pub fn with_node_limit(limit: usize) -> Self {
        Self {
            node_limit: Some(limit),
        }
    }
}

impl HorizonSolver for BranchAndBound {
    #[profiling::function]
    fn solve(&self, problem: &HorizonProblem) -> Option<HorizonSolution> {
        let incumbent = Greedy.solve(problem)?;
        let mut search = Search::new(problem);
        search.best = incumbent;
        search.node_limit = self.node_limit;
        let constant = search.constant;
        if !search.descend(0, constant) {
            log::warn!(
                "Branch and bound stopped after {} nodes, solution may be suboptimal",
                search.nodes
            );
        }
        log::trace!("Branch and bound visited {} nodes", search.nodes);
        Some(search.best)
    }
}

/// Row `j` of the residual is `offset + coefficient * v_k` once all decisions before `k` are fixed.
#[derive(Debug, Copy, Clone)]
struct Row {
    offset: f64,
    coefficient: f64,
}

fn center(rows: &[Row], hint: &[f64], k: usize) -> f64 {
    let den: f64 = rows.iter().map(|r| r.coefficient * r.coefficient).sum();
    if den > 0.0 {
        -rows.iter().map(|r| r.coefficient * r.offset).sum::<f64>() / den
    } else {
        hint.get(k).copied().unwrap_or(0.0)
    }
}

fn row_cost(rows: &[Row], value: f64) -> f64 {
    rows.iter()
        .map(|r| {
            let e = r.offset + r.coefficient * value;
            e * e
        })
        .sum()
}

struct Search<'p, 'a> {
    problem: &'p HorizonProblem<'a>,
    /// Rows completed by each decision, i.e. whose last non-zero column is that decision
    completes: Vec<Vec<usize>>,
    /// Cost of the rows that do not depend on any decision
    constant: f64,
    values: Vec<f64>,
    codes: Vec<u32>,
    best: HorizonSolution,
    nodes: usize,
    node_limit: Option<usize>,
}

impl<'p, 'a> Search<'p, 'a> {
    fn new(problem: &'p HorizonProblem<'a>) -> Self {
        let n = problem.horizon();
        let mut completes = vec![vec![]; n];
        let mut constant = 0.0;
        for j in 0..n {
            match (0..n).rev().find(|&k| problem.gamma[(j, k)] != 0.0) {
                Some(k) => completes[k].push(j),
                None => constant += problem.target[j] * problem.target[j],
            }
        }
        Self {
            problem,
            completes,
            constant,
            values: Vec::with_capacity(n),
            codes: Vec::with_capacity(n),
            best: HorizonSolution {
                codes: vec![],
                cost: f64::INFINITY,
            },
            nodes: 0,
            node_limit: None,
        }
    }

    fn completed_rows(&self, k: usize) -> Vec<Row> {
        let gamma = self.problem.gamma;
        self.completes[k]
            .iter()
            .map(|&j| Row {
                offset: (0..k).map(|i| gamma[(j, i)] * self.values[i]).sum::<f64>()
                    - self.problem.target[j],
                coefficient: gamma[(j, k)],
            })
            .collect()
    }

    /// Returns `false` when the node limit interrupted the search.
    fn descend(&mut self, k: usize, partial: f64) -> bool {
        if k == self.problem.horizon() {
            if partial < self.best.cost {
                self.best = HorizonSolution {
                    codes: self.codes.clone(),
                    cost: partial,
                };
            }
            return true;
        }

        let rows = self.completed_rows(k);
        let candidates = self.problem.candidates;
        for code in candidates.nearest(center(&rows, self.problem.hint, k)) {
            if self.node_limit.is_some_and(|limit| self.nodes >= limit) {
                return false;
            }
            self.nodes += 1;
            let value = candidates.values[code];
            let cost = partial + row_cost(&rows, value);
            if !(cost < self.best.cost) {
                break;
            }
            self.values.push(value);
            self.codes.push(code as u32);
            let complete = self.descend(k + 1, cost);
            self.values.pop();
            self.codes.pop();
            if !complete {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn brute_force(problem: &HorizonProblem) -> f64 {
        let n = problem.horizon();
        let m = problem.candidates.len();
        let mut best = f64::INFINITY;
        let mut codes = vec![0u32; n];
        for index in 0..m.pow(n as u32) {
            let mut rest = index;
            for c in codes.iter_mut() {
                *c = (rest % m) as u32;
                rest /= m;
            }
            best = best.min(problem.cost(&codes));
        }
        best
    }

    fn random_problem(rng: &mut fastrand::Rng, n: usize, d: f64) -> (DMatrix<f64>, DVector<f64>) {
        let h: Vec<f64> = std::iter::once(d)
            .chain((1..n).map(|_| 2.0 * rng.f64() - 1.0))
            .collect();
        let gamma = DMatrix::from_fn(n, n, |r, c| if r >= c { h[r - c] } else { 0.0 });
        let target = DVector::from_fn(n, |_, _| 8.0 * rng.f64() - 2.0);
        (gamma, target)
    }

    #[test]
    fn nearest_first_ordering() {
        let set = CandidateSet::new(vec![0.0, 3.0, 1.0, 2.0]);
        insta::assert_debug_snapshot!(set.nearest(1.5).collect::<Vec<_>>(), @r###"
        [
            3,
            2,
            1,
            0,
        ]
        "###);
        assert_eq!(vec![0, 2, 3, 1], set.nearest(-4.0).collect::<Vec<_>>());
        assert_eq!(vec![1, 3, 2, 0], set.nearest(10.0).collect::<Vec<_>>());
        assert!(CandidateSet::new(vec![]).nearest(0.0).next().is_none());
    }

    #[rstest]
    fn branch_and_bound_is_exact(#[values(1, 2, 3)] n: usize, #[values(1.0, 0.0)] d: f64) {
        let mut rng = fastrand::Rng::with_seed(n as u64 + 10);
        let candidates = CandidateSet::uniform(5);
        for _ in 0..20 {
            let (gamma, target) = random_problem(&mut rng, n, d);
            let hint = vec![2.0; n];
            let problem = HorizonProblem {
                gamma: &gamma,
                target: &target,
                hint: &hint,
                candidates: &candidates,
            };
            let solution = BranchAndBound::new().solve(&problem).unwrap();
            assert_eq!(n, solution.codes.len());
            assert!((solution.cost - problem.cost(&solution.codes)).abs() < 1e-9);
            assert!((solution.cost - brute_force(&problem)).abs() < 1e-9);

            let greedy = Greedy.solve(&problem).unwrap();
            assert!(solution.cost <= greedy.cost + 1e-12);
        }
    }

    #[test]
    fn single_decision_rounds_to_nearest() {
        let gamma = DMatrix::from_element(1, 1, 2.0);
        let candidates = CandidateSet::uniform(16);
        let cases = [(6.4, 3), (7.4, 4), (7.0, 4), (-5.0, 0), (99.0, 15)];
        for (target, expected) in cases {
            let target = DVector::from_element(1, target);
            let problem = HorizonProblem {
                gamma: &gamma,
                target: &target,
                hint: &[0.0],
                candidates: &candidates,
            };
            assert_eq!(vec![expected], BranchAndBound::new().solve(&problem).unwrap().codes);
            assert_eq!(vec![expected], Greedy.solve(&problem).unwrap().codes);
        }
    }

    #[test]
    fn lookahead_beats_greedy() {
        let gamma = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let target = DVector::from_row_slice(&[0.4, 5.0]);
        let candidates = CandidateSet::uniform(4);
        let problem = HorizonProblem {
            gamma: &gamma,
            target: &target,
            hint: &[0.0, 0.0],
            candidates: &candidates,
        };
        let greedy = Greedy.solve(&problem).unwrap();
        assert_eq!(vec![0, 3], greedy.codes);
        assert!((greedy.cost - 4.16).abs() < 1e-12);

        let exact = BranchAndBound::new().solve(&problem).unwrap();
        assert_eq!(vec![1, 3], exact.codes);
        assert!((exact.cost - 1.36).abs() < 1e-12);
    }

    #[test]
    fn unused_decisions_follow_hint() {
        let gamma = DMatrix::zeros(2, 2);
        let target = DVector::from_row_slice(&[1.0, 2.0]);
        let candidates = CandidateSet::uniform(8);
        let problem = HorizonProblem {
            gamma: &gamma,
            target: &target,
            hint: &[2.2, 6.9],
            candidates: &candidates,
        };
        let solution = BranchAndBound::new().solve(&problem).unwrap();
        assert_eq!(vec![2, 7], solution.codes);
        assert_eq!(5.0, solution.cost);
    }

    #[test]
    fn non_finite_problem_has_no_solution() {
        let gamma = DMatrix::from_element(1, 1, f64::NAN);
        let target = DVector::from_element(1, 0.0);
        let candidates = CandidateSet::uniform(4);
        let problem = HorizonProblem {
            gamma: &gamma,
            target: &target,
            hint: &[0.0],
            candidates: &candidates,
        };
        assert_eq!(None, BranchAndBound::new().solve(&problem));
        assert_eq!(None, Greedy.solve(&problem));
    }

    #[test]
    fn node_limit_keeps_incumbent() {
        let mut rng = fastrand::Rng::with_seed(3);
        let (gamma, target) = random_problem(&mut rng, 4, 1.0);
        let candidates = CandidateSet::uniform(8);
        let hint = [0.0; 4];
        let problem = HorizonProblem {
            gamma: &gamma,
            target: &target,
            hint: &hint,
            candidates: &candidates,
        };
        let limited = BranchAndBound::with_node_limit(1).solve(&problem).unwrap();
        let greedy = Greedy.solve(&problem).unwrap();
        assert!(limited.cost <= greedy.cost);
        assert_eq!(4, limited.codes.len());
    }
}
