//! Step-selection filtering with fixed precedence.
//!
//! Rule order is strict and the first match wins:
//! 1. skip set (name or 1-based index) - skip always dominates include
//! 2. job allow-list
//! 3. inclusion filter (names and/or indices)
//! 4. default: execute

use runlocal_core::pipeline::{Job, Pipeline, Step};
use runlocal_core::result::SkipReason;
use std::collections::HashSet;

/// Max edit distance for "did you mean" suggestions.
const SUGGESTION_THRESHOLD: usize = 3;

/// User-supplied step-selection criteria.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Step names to include (case-insensitive).
    pub step_names: HashSet<String>,
    /// 1-based step indices to include.
    pub step_indices: HashSet<usize>,
    /// Step names to skip (case-insensitive).
    pub skip_names: HashSet<String>,
    /// 1-based step indices to skip.
    pub skip_indices: HashSet<usize>,
    /// Job ids to include; empty means all jobs.
    pub jobs: HashSet<String>,
    pub preview_only: bool,
    pub confirm_before_run: bool,
    /// When a job allow-list is set, also pull in its transitive
    /// dependencies.
    pub include_dependencies: bool,
}

impl FilterOptions {
    /// True if any inclusion or skip criterion is set.
    pub fn has_filters(&self) -> bool {
        !self.step_names.is_empty()
            || !self.step_indices.is_empty()
            || !self.skip_names.is_empty()
            || !self.skip_indices.is_empty()
            || !self.jobs.is_empty()
    }

    fn has_includes(&self) -> bool {
        !self.step_names.is_empty() || !self.step_indices.is_empty()
    }
}

/// The decision for one step, with a machine-readable reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub should_execute: bool,
    pub skip_reason: Option<SkipReason>,
    pub reason: String,
}

impl FilterResult {
    fn execute(reason: impl Into<String>) -> Self {
        Self {
            should_execute: true,
            skip_reason: None,
            reason: reason.into(),
        }
    }

    fn skip(reason: SkipReason, text: impl Into<String>) -> Self {
        Self {
            should_execute: false,
            skip_reason: Some(reason),
            reason: text.into(),
        }
    }
}

/// A suggestion for an include name that matched no step in the pipeline.
#[derive(Debug, Clone)]
pub struct FilterSuggestion {
    pub requested: String,
    pub candidates: Vec<String>,
}

/// Compiled step filter. Build once per pipeline via [`StepFilterBuilder`];
/// usable identically by a live run, a preview, and a re-run.
#[derive(Debug, Clone)]
pub struct StepFilter {
    options: FilterOptions,
    // Lowercased copies so matching stays case-insensitive.
    include_names: HashSet<String>,
    skip_names: HashSet<String>,
    suggestions: Vec<FilterSuggestion>,
}

pub struct StepFilterBuilder;

impl StepFilterBuilder {
    /// Pure function of options and pipeline.
    pub fn build(mut options: FilterOptions, pipeline: &Pipeline) -> StepFilter {
        if options.include_dependencies && !options.jobs.is_empty() {
            options.jobs = expand_with_dependencies(&options.jobs, pipeline);
        }

        let include_names: HashSet<String> =
            options.step_names.iter().map(|n| n.to_lowercase()).collect();
        let skip_names: HashSet<String> =
            options.skip_names.iter().map(|n| n.to_lowercase()).collect();

        let suggestions = suggest_unmatched(&options.step_names, pipeline);

        StepFilter {
            options,
            include_names,
            skip_names,
            suggestions,
        }
    }
}

impl StepFilter {
    /// Decide whether `step` (at 0-based position `index` within `job`)
    /// executes.
    pub fn should_execute(&self, step: &Step, index: usize, job: &Job) -> FilterResult {
        let ordinal = index + 1;

        if self.matches_name(&self.skip_names, step) || self.options.skip_indices.contains(&ordinal)
        {
            return FilterResult::skip(
                SkipReason::ExplicitlySkipped,
                format!("step '{}' is in the skip list", step.display_name()),
            );
        }

        if !self.options.jobs.is_empty() && !self.options.jobs.contains(&job.id) {
            return FilterResult::skip(
                SkipReason::JobNotSelected,
                format!("job '{}' is not in the selected set", job.id),
            );
        }

        if self.options.has_includes() {
            if self.matches_name(&self.include_names, step)
                || self.options.step_indices.contains(&ordinal)
            {
                return FilterResult::execute("matches include filter");
            }
            return FilterResult::skip(
                SkipReason::FilteredOut,
                format!("step '{}' does not match the include filter", step.display_name()),
            );
        }

        FilterResult::execute("no filter applied")
    }

    /// True if this filter selects anything at all (see
    /// [`FilterOptions::has_filters`]).
    pub fn has_filters(&self) -> bool {
        self.options.has_filters()
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Closest step names for include names that matched nothing.
    pub fn suggestions(&self) -> &[FilterSuggestion] {
        &self.suggestions
    }

    fn matches_name(&self, names: &HashSet<String>, step: &Step) -> bool {
        names.contains(&step.display_name().to_lowercase())
            || names.contains(&step.id.to_lowercase())
    }
}

/// Grow a job allow-list with every transitive dependency.
fn expand_with_dependencies(jobs: &HashSet<String>, pipeline: &Pipeline) -> HashSet<String> {
    let mut selected = jobs.clone();
    let mut frontier: Vec<String> = jobs.iter().cloned().collect();
    while let Some(id) = frontier.pop() {
        if let Some(job) = pipeline.job(&id) {
            for dep in &job.depends_on {
                if selected.insert(dep.clone()) {
                    frontier.push(dep.clone());
                }
            }
        }
    }
    selected
}

fn suggest_unmatched(step_names: &HashSet<String>, pipeline: &Pipeline) -> Vec<FilterSuggestion> {
    let all_steps: Vec<&Step> = pipeline.jobs.iter().flat_map(|j| j.steps.iter()).collect();
    let mut suggestions = Vec::new();

    for requested in step_names {
        let requested_lower = requested.to_lowercase();
        let matched = all_steps.iter().any(|s| {
            s.display_name().to_lowercase() == requested_lower
                || s.id.to_lowercase() == requested_lower
        });
        if matched {
            continue;
        }
        let mut scored: Vec<(usize, String)> = all_steps
            .iter()
            .map(|s| {
                (
                    levenshtein(&requested_lower, &s.display_name().to_lowercase()),
                    s.display_name().to_string(),
                )
            })
            .filter(|(dist, _)| *dist <= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort();
        scored.dedup_by(|a, b| a.1 == b.1);
        suggestions.push(FilterSuggestion {
            requested: requested.clone(),
            candidates: scored.into_iter().map(|(_, name)| name).collect(),
        });
    }

    suggestions.sort_by(|a, b| a.requested.cmp(&b.requested));
    suggestions
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut matrix = vec![vec![0usize; b_len + 1]; a_len + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b_len {
        matrix[0][j] = j;
    }

    for i in 1..=a_len {
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[a_len][b_len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlocal_core::pipeline::StepKind;
    use std::collections::HashMap;

    fn make_step(name: &str) -> Step {
        Step {
            id: name.to_lowercase(),
            name: name.to_string(),
            kind: StepKind::Script,
            run: Some(format!("echo {}", name)),
            with: HashMap::new(),
            needs: vec![],
            continue_on_error: false,
            timeout_minutes: None,
            env: HashMap::new(),
        }
    }

    fn make_job(id: &str, steps: Vec<&str>, depends_on: Vec<&str>) -> Job {
        Job {
            id: id.to_string(),
            name: String::new(),
            runs_on: String::new(),
            steps: steps.into_iter().map(make_step).collect(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            condition: None,
            env: HashMap::new(),
        }
    }

    fn make_pipeline() -> Pipeline {
        Pipeline {
            name: "demo".to_string(),
            jobs: vec![make_job(
                "ci",
                vec!["Checkout", "Setup", "Build", "Test", "Deploy"],
                vec![],
            )],
        }
    }

    fn decisions(filter: &StepFilter, pipeline: &Pipeline) -> Vec<FilterResult> {
        let job = &pipeline.jobs[0];
        job.steps
            .iter()
            .enumerate()
            .map(|(i, s)| filter.should_execute(s, i, job))
            .collect()
    }

    #[test]
    fn test_no_filter_runs_everything() {
        let pipeline = make_pipeline();
        let filter = StepFilterBuilder::build(FilterOptions::default(), &pipeline);
        assert!(!filter.has_filters());
        for result in decisions(&filter, &pipeline) {
            assert!(result.should_execute);
            assert_eq!(result.reason, "no filter applied");
        }
    }

    #[test]
    fn test_skip_by_name() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            skip_names: HashSet::from(["Deploy".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let results = decisions(&filter, &pipeline);
        let expected = [true, true, true, true, false];
        for (result, want) in results.iter().zip(expected) {
            assert_eq!(result.should_execute, want);
        }
        assert_eq!(
            results[4].skip_reason,
            Some(SkipReason::ExplicitlySkipped)
        );
    }

    #[test]
    fn test_skip_dominates_include() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            step_names: HashSet::from(["Build".to_string(), "Test".to_string()]),
            skip_names: HashSet::from(["Test".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let results = decisions(&filter, &pipeline);
        // Build (index 2) included, Test (index 3) skipped despite matching
        // the include filter.
        assert!(results[2].should_execute);
        assert!(!results[3].should_execute);
        assert_eq!(results[3].skip_reason, Some(SkipReason::ExplicitlySkipped));
        // Everything else is filtered out by the include filter.
        assert_eq!(results[0].skip_reason, Some(SkipReason::FilteredOut));
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            step_names: HashSet::from(["bUiLd".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let results = decisions(&filter, &pipeline);
        assert!(results[2].should_execute);
        assert_eq!(results[2].reason, "matches include filter");
    }

    #[test]
    fn test_include_by_index_is_one_based() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            step_indices: HashSet::from([1, 3]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let results = decisions(&filter, &pipeline);
        let executed: Vec<bool> = results.iter().map(|r| r.should_execute).collect();
        assert_eq!(executed, vec![true, false, true, false, false]);
    }

    #[test]
    fn test_skip_by_index() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            skip_indices: HashSet::from([5]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let results = decisions(&filter, &pipeline);
        assert!(results[3].should_execute);
        assert!(!results[4].should_execute);
    }

    #[test]
    fn test_job_allow_list() {
        let mut pipeline = make_pipeline();
        pipeline.jobs.push(make_job("docs", vec!["Render"], vec![]));
        let options = FilterOptions {
            jobs: HashSet::from(["ci".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);

        let docs = &pipeline.jobs[1];
        let result = filter.should_execute(&docs.steps[0], 0, docs);
        assert!(!result.should_execute);
        assert_eq!(result.skip_reason, Some(SkipReason::JobNotSelected));

        let ci = &pipeline.jobs[0];
        assert!(filter.should_execute(&ci.steps[0], 0, ci).should_execute);
    }

    #[test]
    fn test_skip_checked_before_job_allow_list() {
        let mut pipeline = make_pipeline();
        pipeline.jobs.push(make_job("docs", vec!["Render"], vec![]));
        let options = FilterOptions {
            jobs: HashSet::from(["ci".to_string()]),
            skip_names: HashSet::from(["Render".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let docs = &pipeline.jobs[1];
        let result = filter.should_execute(&docs.steps[0], 0, docs);
        assert_eq!(result.skip_reason, Some(SkipReason::ExplicitlySkipped));
    }

    #[test]
    fn test_include_dependencies_expands_allow_list() {
        let pipeline = Pipeline {
            name: "demo".to_string(),
            jobs: vec![
                make_job("lint", vec!["Run"], vec![]),
                make_job("build", vec!["Run"], vec![]),
                make_job("test", vec!["Run"], vec!["build"]),
                make_job("deploy", vec!["Run"], vec!["test"]),
            ],
        };
        let options = FilterOptions {
            jobs: HashSet::from(["deploy".to_string()]),
            include_dependencies: true,
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let selected = &filter.options().jobs;
        assert!(selected.contains("deploy"));
        assert!(selected.contains("test"));
        assert!(selected.contains("build"));
        assert!(!selected.contains("lint"));
    }

    #[test]
    fn test_suggestions_for_unmatched_name() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            step_names: HashSet::from(["Biuld".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        let suggestions = filter.suggestions();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].requested, "Biuld");
        assert!(suggestions[0].candidates.contains(&"Build".to_string()));
    }

    #[test]
    fn test_no_suggestions_when_name_matches() {
        let pipeline = make_pipeline();
        let options = FilterOptions {
            step_names: HashSet::from(["Build".to_string()]),
            ..Default::default()
        };
        let filter = StepFilterBuilder::build(options, &pipeline);
        assert!(filter.suggestions().is_empty());
    }

    #[test]
    fn test_has_filters() {
        assert!(!FilterOptions::default().has_filters());
        let options = FilterOptions {
            skip_indices: HashSet::from([2]),
            ..Default::default()
        };
        assert!(options.has_filters());
        let preview = FilterOptions {
            preview_only: true,
            ..Default::default()
        };
        assert!(!preview.has_filters());
    }
}
