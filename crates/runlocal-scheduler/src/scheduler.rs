//! Job dependency ordering.
//!
//! Jobs declare `depends_on` edges; the scheduler assigns each job a rank
//! such that every job ranks strictly above all of its dependencies, and
//! rejects self-dependencies, unknown references, and cycles before
//! anything executes.

use runlocal_core::pipeline::Pipeline;
use runlocal_core::{Error, Result};
use std::collections::HashMap;

/// A non-fatal problem found while checking step references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFinding {
    pub job_id: String,
    pub step_id: String,
    pub message: String,
}

/// Vertex colors for the cycle-detecting depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

pub struct DependencyScheduler;

impl DependencyScheduler {
    /// Assign every job a rank. A job's rank is strictly greater than the
    /// rank of each of its dependencies; independent jobs may share a rank.
    pub fn order(pipeline: &Pipeline) -> Result<HashMap<String, usize>> {
        // Self-dependency gets its own message before the generic cycle walk
        // would trip over it.
        for job in &pipeline.jobs {
            if job.depends_on.iter().any(|dep| *dep == job.id) {
                return Err(Error::SelfDependency(job.id.clone()));
            }
        }

        let known: HashMap<&str, &[String]> = pipeline
            .jobs
            .iter()
            .map(|j| (j.id.as_str(), j.depends_on.as_slice()))
            .collect();

        for job in &pipeline.jobs {
            for dep in &job.depends_on {
                if !known.contains_key(dep.as_str()) {
                    return Err(Error::MissingReference(format!(
                        "job '{}' depends on unknown job '{}'",
                        job.id, dep
                    )));
                }
            }
        }

        let mut marks: HashMap<&str, Mark> = known
            .keys()
            .map(|id| (*id, Mark::Unvisited))
            .collect();
        let mut ranks: HashMap<String, usize> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        for job in &pipeline.jobs {
            Self::visit(job.id.as_str(), &known, &mut marks, &mut ranks, &mut path)?;
        }

        Ok(ranks)
    }

    fn visit<'a>(
        id: &'a str,
        known: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        ranks: &mut HashMap<String, usize>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks[id] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                // The cycle is the path suffix starting at this vertex.
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(id);
                return Err(Error::CycleDetected(cycle.join(" -> ")));
            }
            Mark::Unvisited => {}
        }

        marks.insert(id, Mark::InProgress);
        path.push(id);

        let mut rank = 0;
        for dep in known[id] {
            Self::visit(dep.as_str(), known, marks, ranks, path)?;
            rank = rank.max(ranks[dep.as_str()] + 1);
        }

        path.pop();
        marks.insert(id, Mark::Done);
        ranks.insert(id.to_string(), rank);
        Ok(())
    }

    /// Job ids in execution order: ascending rank, declared order within a
    /// rank.
    pub fn execution_order(pipeline: &Pipeline) -> Result<Vec<String>> {
        let ranks = Self::order(pipeline)?;
        let mut ordered: Vec<String> = pipeline.jobs.iter().map(|j| j.id.clone()).collect();
        // Stable, so declaration order breaks rank ties.
        ordered.sort_by_key(|id| ranks[id]);
        Ok(ordered)
    }

    /// Check step-level `needs` references. Unlike job dependencies these
    /// never reorder anything (steps always run in declared order), so
    /// problems are collected rather than failing on the first one.
    pub fn validate_steps(pipeline: &Pipeline) -> Vec<ValidationFinding> {
        let mut findings = Vec::new();
        for job in &pipeline.jobs {
            for step in &job.steps {
                for need in &step.needs {
                    if *need == step.id {
                        findings.push(ValidationFinding {
                            job_id: job.id.clone(),
                            step_id: step.id.clone(),
                            message: format!("step '{}' cannot need itself", step.id),
                        });
                    } else if job.step(need).is_none() {
                        findings.push(ValidationFinding {
                            job_id: job.id.clone(),
                            step_id: step.id.clone(),
                            message: format!(
                                "step '{}' needs unknown step '{}'",
                                step.id, need
                            ),
                        });
                    }
                }
            }
        }
        findings
    }
}
