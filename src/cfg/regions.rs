//! CFG regions module
//!
//! Regions are the lexical scopes (locals, try, catch, filter, handler, finally) overlaid on
//! the block sequence. They live in an id-indexed arena; a region knows its parent and
//! children by id and covers a contiguous range of block ordinals.

use crate::cfg::capture::CaptureId;
use crate::error::{Error, Result};
use crate::operation::Local;
use serde::Serialize;
use std::fmt;

/// Region identifier; the root region is always 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegionId(pub usize);

impl RegionId {
    pub const ROOT: RegionId = RegionId(0);
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionKind {
    Root,
    Locals,
    Try,
    Catch,
    Filter,
    Handler,
    TryAndCatch,
    TryAndFinally,
    Finally,
    FilterAndHandler,
}

impl RegionKind {
    /// Kinds allowed as the parent of a region of this kind
    pub fn allowed_parents(self) -> &'static [RegionKind] {
        use RegionKind::*;
        match self {
            Root => &[],
            Try => &[TryAndCatch, TryAndFinally],
            Catch | FilterAndHandler => &[TryAndCatch],
            Filter | Handler => &[FilterAndHandler],
            Finally => &[TryAndFinally],
            Locals | TryAndCatch | TryAndFinally => &[
                Root,
                Locals,
                Try,
                Catch,
                Handler,
                Finally,
                Filter,
                FilterAndHandler,
            ],
        }
    }

    /// Whether the region directly holds statements of a handler
    pub fn is_handler_body(self) -> bool {
        matches!(self, RegionKind::Catch | RegionKind::Handler)
    }
}

/// A lexical region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    pub parent: Option<RegionId>,
    /// Children in lexical order
    pub children: Vec<RegionId>,
    /// First block ordinal covered by this region
    pub first_block: Option<usize>,
    /// Last block ordinal covered by this region
    pub last_block: Option<usize>,
    pub locals: Vec<Local>,
    /// Flow captures whose lifetime is this region
    pub capture_ids: Vec<CaptureId>,
    /// Caught type of a `Catch` or `FilterAndHandler`; `None` there means "any"
    pub exception_type: Option<String>,
}

impl Region {
    fn new(
        id: RegionId,
        kind: RegionKind,
        parent: Option<RegionId>,
        exception_type: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            parent,
            children: Vec::new(),
            first_block: None,
            last_block: None,
            locals: Vec::new(),
            capture_ids: Vec::new(),
            exception_type,
        }
    }

    /// Whether the block ordinal lies inside this region's range
    pub fn contains_block(&self, ordinal: usize) -> bool {
        match (self.first_block, self.last_block) {
            (Some(first), Some(last)) => first <= ordinal && ordinal <= last,
            _ => false,
        }
    }

    pub fn declares_local(&self, name: &str) -> bool {
        self.locals.iter().any(|local| local.name == name)
    }
}

/// Arena of regions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RegionTree {
    regions: Vec<Region>,
}

impl Default for RegionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionTree {
    /// Create a tree holding only the root region
    pub fn new() -> Self {
        Self {
            regions: vec![Region::new(RegionId::ROOT, RegionKind::Root, None, None)],
        }
    }

    pub fn root(&self) -> &Region {
        &self.regions[0]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0)
    }

    /// Region by id, failing with an internal error for ids this tree never issued
    pub fn region(&self, id: RegionId) -> Result<&Region> {
        self.regions
            .get(id.0)
            .ok_or_else(|| Error::internal(format!("unknown region {}", id)))
    }

    pub(crate) fn region_mut(&mut self, id: RegionId) -> Result<&mut Region> {
        self.regions
            .get_mut(id.0)
            .ok_or_else(|| Error::internal(format!("unknown region {}", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn kind(&self, id: RegionId) -> Option<RegionKind> {
        self.get(id).map(|region| region.kind)
    }

    pub fn parent(&self, id: RegionId) -> Option<RegionId> {
        self.get(id).and_then(|region| region.parent)
    }

    /// Add a child region; ids are handed out in creation (lexical pre-) order
    pub(crate) fn add(
        &mut self,
        kind: RegionKind,
        parent: RegionId,
        exception_type: Option<String>,
    ) -> Result<RegionId> {
        let id = RegionId(self.regions.len());
        self.region_mut(parent)?.children.push(id);
        self.regions
            .push(Region::new(id, kind, Some(parent), exception_type));
        Ok(id)
    }

    /// Extend the block range of `id` and all its ancestors to cover `ordinal`
    pub(crate) fn note_block(&mut self, id: RegionId, ordinal: usize) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(region) = self.regions.get_mut(current.0) else {
                break;
            };
            region.first_block = Some(region.first_block.map_or(ordinal, |f| f.min(ordinal)));
            region.last_block = Some(region.last_block.map_or(ordinal, |l| l.max(ordinal)));
            cursor = region.parent;
        }
    }

    /// `id` followed by each of its ancestors up to the root
    pub fn ancestors(&self, id: RegionId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).map(|region| region.id),
        }
    }

    /// Whether `ancestor` is `id` itself or encloses it
    pub fn is_ancestor_or_self(&self, ancestor: RegionId, id: RegionId) -> bool {
        self.ancestors(id).any(|region| region == ancestor)
    }

    /// Lowest region enclosing both `a` and `b`
    pub fn common_ancestor(&self, a: RegionId, b: RegionId) -> RegionId {
        let chain: Vec<RegionId> = self.ancestors(a).collect();
        self.ancestors(b)
            .find(|region| chain.contains(region))
            .unwrap_or(RegionId::ROOT)
    }

    /// Regions from `from` up to, but excluding, `ancestor`; innermost first
    pub fn path_to_ancestor(&self, from: RegionId, ancestor: RegionId) -> Vec<RegionId> {
        self.ancestors(from)
            .take_while(|&region| region != ancestor)
            .collect()
    }

    /// Nearest enclosing region (or `id` itself) of one of `kinds`
    pub fn nearest_of_kind(&self, id: RegionId, kinds: &[RegionKind]) -> Option<RegionId> {
        self.ancestors(id)
            .find(|&region| self.kind(region).is_some_and(|kind| kinds.contains(&kind)))
    }

    /// First child of `id` with the given kind
    pub fn child_of_kind(&self, id: RegionId, kind: RegionKind) -> Option<RegionId> {
        self.get(id)?
            .children
            .iter()
            .copied()
            .find(|&child| self.kind(child) == Some(kind))
    }

    /// Innermost region whose range covers the ordinal
    pub fn innermost_containing(&self, ordinal: usize) -> RegionId {
        let mut current = RegionId::ROOT;
        loop {
            let next = self.get(current).and_then(|region| {
                region.children.iter().copied().find(|&child| {
                    self.get(child)
                        .is_some_and(|child| child.contains_block(ordinal))
                })
            });
            match next {
                Some(child) => current = child,
                None => return current,
            }
        }
    }

    /// Whether `name` is declared by `id` or one of its ancestors
    pub fn local_in_scope(&self, id: RegionId, name: &str) -> bool {
        self.ancestors(id).any(|region| {
            self.get(region)
                .is_some_and(|region| region.declares_local(name))
        })
    }

    /// Whether `name` is declared anywhere in the tree
    pub fn declares_local_anywhere(&self, name: &str) -> bool {
        self.regions.iter().any(|region| region.declares_local(name))
    }
}

/// Iterator over a region and its ancestors
pub struct Ancestors<'t> {
    tree: &'t RegionTree,
    next: Option<RegionId>,
}

impl Iterator for Ancestors<'_> {
    type Item = RegionId;

    fn next(&mut self) -> Option<RegionId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}
