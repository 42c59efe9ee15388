//! Bounded common-ancestor search over the fork-history DAG.

use std::collections::HashSet;

use crate::bundle::BundleId;
use crate::error::Result;
use crate::store::BundleGraph;

/// Finds a bundle both forks descend from.
#[allow(clippy::missing_errors_doc)]
pub trait AncestorSearch {
    /// A shared ancestor of `a` and `b` (either may be the other's ancestor),
    /// or `None` if none is reachable within `max_depth` generations of each.
    /// A returned ancestor is present in `graph`.
    fn find_shared_ancestor(
        &self,
        graph: &dyn BundleGraph,
        a: &BundleId,
        b: &BundleId,
        max_depth: usize,
    ) -> Result<Option<BundleId>>;
}

/// Breadth-first search that expands both sides one generation at a time.
///
/// The first bundle reached from both sides is returned, so the result is a
/// nearest common ancestor. Within one generation, parents are visited in the
/// order the manifests list them, which makes the answer deterministic.
///
/// Bundles missing from the graph (collected away) are never returned: the
/// walk steps over them and that branch ends there.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundedAncestorSearch;

impl AncestorSearch for BoundedAncestorSearch {
    fn find_shared_ancestor(
        &self,
        graph: &dyn BundleGraph,
        a: &BundleId,
        b: &BundleId,
        max_depth: usize,
    ) -> Result<Option<BundleId>> {
        if a == b {
            return Ok(Some(a.clone()));
        }

        let mut seen_a: HashSet<BundleId> = HashSet::from([a.clone()]);
        let mut seen_b: HashSet<BundleId> = HashSet::from([b.clone()]);
        let mut frontier_a = start(graph, a)?;
        let mut frontier_b = start(graph, b)?;

        for depth in 1..=max_depth {
            frontier_a = expand(graph, &frontier_a, &mut seen_a)?;
            if let Some((hit, _)) = frontier_a.iter().find(|(id, _)| seen_b.contains(id)) {
                tracing::debug!(%a, %b, ancestor = %hit, depth, "found shared ancestor");
                return Ok(Some(hit.clone()));
            }

            frontier_b = expand(graph, &frontier_b, &mut seen_b)?;
            if let Some((hit, _)) = frontier_b.iter().find(|(id, _)| seen_a.contains(id)) {
                tracing::debug!(%a, %b, ancestor = %hit, depth, "found shared ancestor");
                return Ok(Some(hit.clone()));
            }

            if frontier_a.is_empty() && frontier_b.is_empty() {
                break;
            }
        }

        tracing::debug!(%a, %b, max_depth, "no shared ancestor within bound");
        Ok(None)
    }
}

/// A bundle and its parent links, as held in a search frontier.
type Visited = (BundleId, Vec<BundleId>);

/// `Ok(None)` for a bundle the graph no longer has.
fn lookup(graph: &dyn BundleGraph, id: &BundleId) -> Result<Option<Vec<BundleId>>> {
    match graph.parents(id) {
        Ok(parents) => Ok(Some(parents)),
        Err(e) if e.is_not_found() => {
            tracing::debug!(bundle = %id, "bundle missing from store; branch ends");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn start(graph: &dyn BundleGraph, id: &BundleId) -> Result<Vec<Visited>> {
    Ok(lookup(graph, id)?
        .map(|parents| (id.clone(), parents))
        .into_iter()
        .collect())
}

/// One generation up from `frontier`, skipping anything already seen or no
/// longer in the graph.
fn expand(
    graph: &dyn BundleGraph,
    frontier: &[Visited],
    seen: &mut HashSet<BundleId>,
) -> Result<Vec<Visited>> {
    let mut next = Vec::new();
    for (_, parents) in frontier {
        for parent in parents {
            if seen.contains(parent) {
                continue;
            }
            if let Some(grandparents) = lookup(graph, parent)? {
                seen.insert(parent.clone());
                next.push((parent.clone(), grandparents));
            }
        }
    }
    Ok(next)
}
