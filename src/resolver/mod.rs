//! Dependency Resolver.
//!
//! Depth-first traversal with three vertex states — unvisited, visiting,
//! visited — computing the topological order of the closure reachable
//! from a target job (or of the whole job set when no target is given).
//! A `visiting` successor is a cycle; a dependency id absent from the
//! index is a dangling reference. The DFS returns its post-order
//! directly rather than running a separate topological sort afterward:
//! the post-order of a DFS rooted at the target already is the
//! dependency-first execution order.

use std::collections::HashMap;

use crate::config::Job;
use crate::errors::{ApiloomError, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Unvisited,
    Visiting,
    Visited,
}

/// Computes the execution order for `jobs`. When `target` is `Some`, the
/// order covers only the dependency closure reachable from that job id;
/// when `None`, every job is visited in declaration order.
pub fn resolve(jobs: &[Job], target: Option<&str>) -> Result<Vec<String>> {
    let index: HashMap<&str, &Job> = jobs.iter().map(|j| (j.id.as_str(), j)).collect();

    let mut dangling = Vec::new();
    for job in jobs {
        for dep in &job.dependencies {
            if !index.contains_key(dep.as_str()) {
                dangling.push(format!("{}->{}", job.id, dep));
            }
        }
    }
    if !dangling.is_empty() {
        return Err(ApiloomError::DependencyMissing(format!(
            "dangling dependency references: {}",
            dangling.join(", ")
        )));
    }

    let mut state: HashMap<&str, State> = jobs.iter().map(|j| (j.id.as_str(), State::Unvisited)).collect();
    let mut order = Vec::new();

    match target {
        Some(t) => {
            if !index.contains_key(t) {
                return Err(ApiloomError::DependencyMissing(format!(
                    "target job '{t}' not found"
                )));
            }
            visit(t, &index, &mut state, &mut order)?;
        }
        None => {
            for job in jobs {
                visit(&job.id, &index, &mut state, &mut order)?;
            }
        }
    }

    Ok(order)
}

fn visit<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Job>,
    state: &mut HashMap<&'a str, State>,
    order: &mut Vec<String>,
) -> Result<()> {
    match state.get(id) {
        Some(State::Visited) => return Ok(()),
        Some(State::Visiting) => {
            return Err(ApiloomError::DependencyCycle(format!(
                "cycle detected at job '{id}'"
            )))
        }
        _ => {}
    }

    state.insert(id, State::Visiting);
    let job = index[id];
    for dep in &job.dependencies {
        visit(dep, index, state, order)?;
    }
    state.insert(id, State::Visited);
    order.push(id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobMode, JobType, RetryPolicy};

    fn job(id: &str, deps: &[&str]) -> Job {
        Job {
            id: id.to_string(),
            job_type: JobType::Request,
            mode: JobMode::Production,
            method: None,
            path: None,
            headers: None,
            params: None,
            payload: None,
            timeout: None,
            retry_policy: RetryPolicy::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            session_name: None,
            token_identifier: None,
            token_expiration_identifier: None,
            token_expiration_time: None,
            auth: None,
            response_format: Default::default(),
            output: None,
        }
    }

    #[test]
    fn linear_chain_resolves_in_dependency_order() {
        let jobs = vec![job("login", &[]), job("fetch", &["login"])];
        let order = resolve(&jobs, Some("fetch")).unwrap();
        assert_eq!(order, vec!["login".to_string(), "fetch".to_string()]);
    }

    #[test]
    fn result_is_prefix_closed_topological_order() {
        let jobs = vec![job("a", &[]), job("b", &["a"]), job("c", &["b"])];
        let order = resolve(&jobs, Some("c")).unwrap();
        for (i, id) in order.iter().enumerate() {
            let j = jobs.iter().find(|j| &j.id == id).unwrap();
            for dep in &j.dependencies {
                let dep_pos = order.iter().position(|o| o == dep).unwrap();
                assert!(dep_pos < i);
            }
        }
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let jobs = vec![job("a", &["b"]), job("b", &["a"])];
        let err = resolve(&jobs, Some("a")).unwrap_err();
        assert!(matches!(err, ApiloomError::DependencyCycle(_)));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let jobs = vec![job("a", &["ghost"])];
        let err = resolve(&jobs, Some("a")).unwrap_err();
        assert!(matches!(err, ApiloomError::DependencyMissing(_)));
    }

    #[test]
    fn target_not_found_is_rejected() {
        let jobs = vec![job("a", &[])];
        let err = resolve(&jobs, Some("nope")).unwrap_err();
        assert!(matches!(err, ApiloomError::DependencyMissing(_)));
    }

    #[test]
    fn independent_jobs_preserve_declaration_order() {
        let jobs = vec![job("a", &[]), job("b", &[]), job("c", &["a", "b"])];
        let order = resolve(&jobs, Some("c")).unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn no_target_resolves_whole_set() {
        let jobs = vec![job("a", &[]), job("b", &["a"])];
        let order = resolve(&jobs, None).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn closure_subset_property() {
        // dependencyClosure(t) subset of dependencyClosure(t') when t depends on t'
        let jobs = vec![job("root", &[]), job("mid", &["root"]), job("leaf", &["mid"])];
        let closure_leaf = resolve(&jobs, Some("leaf")).unwrap();
        let closure_mid = resolve(&jobs, Some("mid")).unwrap();
        for id in &closure_mid {
            assert!(closure_leaf.contains(id));
        }
    }
}
