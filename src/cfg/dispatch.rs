//! Exception dispatch planning
//!
//! Computes the region bookkeeping of control transfers: which regions an edge leaves and
//! enters, which finally regions run on the way, where an exception raised in a protected
//! region is dispatched, and whether a bare rethrow is legal at a given point.

use crate::cfg::regions::{RegionId, RegionKind, RegionTree};
use log::trace;

/// Region annotations of one edge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionTransition {
    /// Innermost first
    pub leaving: Vec<RegionId>,
    /// Outermost first
    pub entering: Vec<RegionId>,
    /// Finally regions run before reaching the destination, innermost first
    pub finalizing: Vec<RegionId>,
}

/// Plan the transfer from a block in `source` to a block in `destination`.
///
/// `None` as destination means the edge has no target block (throw, rethrow, unwinding);
/// such an edge leaves every region up to the root.
pub fn plan_transition(
    tree: &RegionTree,
    source: RegionId,
    destination: Option<RegionId>,
) -> RegionTransition {
    let ancestor = match destination {
        Some(destination) => tree.common_ancestor(source, destination),
        None => RegionId::ROOT,
    };

    let leaving = tree.path_to_ancestor(source, ancestor);
    let mut entering = destination
        .map(|destination| tree.path_to_ancestor(destination, ancestor))
        .unwrap_or_default();
    entering.reverse();

    let finalizing = leaving
        .iter()
        .filter_map(|&region| finally_of_try(tree, region))
        .collect();

    let transition = RegionTransition {
        leaving,
        entering,
        finalizing,
    };
    trace!(
        "transition {} -> {:?}: {:?}",
        source,
        destination,
        transition
    );
    transition
}

/// The `Finally` sibling of a `Try` region protected by a try/finally
pub fn finally_of_try(tree: &RegionTree, region: RegionId) -> Option<RegionId> {
    if tree.kind(region)? != RegionKind::Try {
        return None;
    }
    let parent = tree.parent(region)?;
    if tree.kind(parent)? != RegionKind::TryAndFinally {
        return None;
    }
    tree.child_of_kind(parent, RegionKind::Finally)
}

/// The `Finally` region a regular transfer from `source` to `destination` would escape
pub fn escaped_finally(
    tree: &RegionTree,
    source: RegionId,
    destination: Option<RegionId>,
) -> Option<RegionId> {
    let ancestor = match destination {
        Some(destination) => tree.common_ancestor(source, destination),
        None => RegionId::ROOT,
    };
    tree.path_to_ancestor(source, ancestor)
        .into_iter()
        .find(|&region| tree.kind(region) == Some(RegionKind::Finally))
}

/// Whether a bare `throw;` is legal in a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RethrowContext {
    /// Inside a catch or filtered-catch handler
    Permitted,
    /// Inside a finally nested in a catch; the rethrow would escape the finally
    InsideFinally,
    /// Not inside any catch or filtered-catch handler
    OutsideCatch,
}

pub fn rethrow_context(tree: &RegionTree, region: RegionId) -> RethrowContext {
    let mut crossed_finally = false;
    for ancestor in tree.ancestors(region) {
        match tree.kind(ancestor) {
            Some(kind) if kind.is_handler_body() => {
                return if crossed_finally {
                    RethrowContext::InsideFinally
                } else {
                    RethrowContext::Permitted
                };
            }
            Some(RegionKind::Finally) => crossed_finally = true,
            _ => {}
        }
    }
    RethrowContext::OutsideCatch
}

/// Where an exception raised in a protected region goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    /// First block of an unfiltered catch
    Catch { region: RegionId, block: usize },
    /// First block of the filter of a filtered catch
    Filter { region: RegionId, block: usize },
    /// First block of the finally
    Finally { region: RegionId, block: usize },
    /// The exception leaves the construct when no handler claims it, or when a handler
    /// or finally itself raises
    Unwind,
}

impl DispatchTarget {
    pub fn block(&self) -> Option<usize> {
        match self {
            DispatchTarget::Catch { block, .. }
            | DispatchTarget::Filter { block, .. }
            | DispatchTarget::Finally { block, .. } => Some(*block),
            DispatchTarget::Unwind => None,
        }
    }
}

/// Dispatch successors of a `Try` region, in dispatch order.
///
/// One target per catch (the filter block of a filtered catch) or, for the body of a
/// try/finally, its finally; then a trailing `Unwind`, so a try with N catches always has
/// N + 1 successors. Regions that are not `Try` regions have no dispatch targets.
pub fn dispatch_targets(tree: &RegionTree, protected: RegionId) -> Vec<DispatchTarget> {
    let mut targets = Vec::new();
    if tree.kind(protected) != Some(RegionKind::Try) {
        return targets;
    }
    let Some(parent) = tree.parent(protected).and_then(|id| tree.get(id)) else {
        return targets;
    };

    let first_block = |region: RegionId| tree.get(region).and_then(|r| r.first_block);

    for &sibling in parent.children.iter().filter(|&&child| child != protected) {
        let Some(region) = tree.get(sibling) else {
            continue;
        };
        match region.kind {
            RegionKind::Catch => {
                if let Some(block) = first_block(sibling) {
                    targets.push(DispatchTarget::Catch {
                        region: sibling,
                        block,
                    });
                }
            }
            RegionKind::FilterAndHandler => {
                let filter = tree.child_of_kind(sibling, RegionKind::Filter);
                if let Some((filter, block)) =
                    filter.and_then(|filter| first_block(filter).map(|block| (filter, block)))
                {
                    targets.push(DispatchTarget::Filter {
                        region: filter,
                        block,
                    });
                }
            }
            RegionKind::Finally => {
                if let Some(block) = first_block(sibling) {
                    targets.push(DispatchTarget::Finally {
                        region: sibling,
                        block,
                    });
                }
            }
            _ => {}
        }
    }

    targets.push(DispatchTarget::Unwind);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    /// try { } catch (E) { } catch { } with a surrounding finally
    fn nested_tree() -> RegionTree {
        let mut tree = RegionTree::new();
        let taf = tree.add(RegionKind::TryAndFinally, RegionId::ROOT, None).unwrap();
        let outer_try = tree.add(RegionKind::Try, taf, None).unwrap();
        let tac = tree.add(RegionKind::TryAndCatch, outer_try, None).unwrap();
        let inner_try = tree.add(RegionKind::Try, tac, None).unwrap();
        let typed = tree.add(RegionKind::Catch, tac, Some("E".into())).unwrap();
        let untyped = tree.add(RegionKind::Catch, tac, None).unwrap();
        let finally = tree.add(RegionKind::Finally, taf, None).unwrap();
        for (region, ordinal) in [(inner_try, 1), (typed, 2), (untyped, 3), (finally, 4)] {
            tree.note_block(region, ordinal);
        }
        tree
    }

    #[test]
    fn throw_leaves_everything_and_runs_outer_finally() {
        let tree = nested_tree();
        let transition = plan_transition(&tree, RegionId(6), None);
        assert_eq!(
            transition.leaving,
            vec![RegionId(6), RegionId(3), RegionId(2), RegionId(1)]
        );
        assert!(transition.entering.is_empty());
        assert_eq!(transition.finalizing, vec![RegionId(7)]);
    }

    #[test]
    fn entering_is_outermost_first() {
        let tree = nested_tree();
        let transition = plan_transition(&tree, RegionId::ROOT, Some(RegionId(4)));
        assert_eq!(
            transition.entering,
            vec![RegionId(1), RegionId(2), RegionId(3), RegionId(4)]
        );
        assert!(transition.finalizing.is_empty());
    }

    #[test]
    fn catch_all_still_ends_with_unwind() {
        let tree = nested_tree();
        assert_eq!(
            dispatch_targets(&tree, RegionId(4)),
            vec![
                DispatchTarget::Catch { region: RegionId(5), block: 2 },
                DispatchTarget::Catch { region: RegionId(6), block: 3 },
                DispatchTarget::Unwind,
            ]
        );
        assert_eq!(
            dispatch_targets(&tree, RegionId(2)),
            vec![
                DispatchTarget::Finally { region: RegionId(7), block: 4 },
                DispatchTarget::Unwind,
            ]
        );
    }

    #[test]
    fn rethrow_contexts() {
        let mut tree = nested_tree();
        assert_eq!(rethrow_context(&tree, RegionId(5)), RethrowContext::Permitted);
        assert_eq!(rethrow_context(&tree, RegionId(7)), RethrowContext::OutsideCatch);

        let taf = tree.add(RegionKind::TryAndFinally, RegionId(5), None).unwrap();
        let finally = tree.add(RegionKind::Finally, taf, None).unwrap();
        assert_eq!(rethrow_context(&tree, finally), RethrowContext::InsideFinally);
    }
}
