//! Flow captures
//!
//! A flow capture is a synthetic single-assignment slot holding a value computed in one
//! block and read in another, across a branch. Ids are allocated while lowering; each
//! capture's scope is settled once the graph is complete, as the narrowest region that
//! encloses every block writing or reading it.

use crate::cfg::block::{BasicBlock, CaptureUse, FlowOp};
use crate::cfg::regions::{RegionId, RegionTree};
use crate::error::{Error, Result};
use log::trace;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CaptureId(pub u32);

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocator of capture ids for one graph
#[derive(Debug, Default)]
pub struct FlowCaptureAllocator {
    /// Region current when each capture was allocated, indexed by id
    origins: Vec<RegionId>,
}

impl FlowCaptureAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a capture evaluated inside `region`; writes are added separately
    pub fn allocate(&mut self, region: RegionId) -> CaptureId {
        let id = CaptureId(self.origins.len() as u32);
        self.origins.push(region);
        trace!("allocated capture {} in {}", id, region);
        id
    }

    /// Assignment of `value` to the capture
    pub fn write<'a>(&self, id: CaptureId, value: FlowOp<'a>) -> FlowOp<'a> {
        FlowOp::FlowCapture {
            id,
            value: Box::new(value),
        }
    }

    /// Allocate a capture and produce its single assignment
    pub fn capture<'a>(&mut self, region: RegionId, value: FlowOp<'a>) -> (CaptureId, FlowOp<'a>) {
        let id = self.allocate(region);
        (id, self.write(id, value))
    }

    /// Leaf reading the capture
    pub fn reference<'a>(&self, id: CaptureId) -> FlowOp<'a> {
        FlowOp::FlowCaptureReference { id }
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Settle every used capture's scope and record it on the owning region.
    ///
    /// Fails when a capture is read without ever being written, or when its writers and
    /// readers reach outside the region it was allocated in.
    pub fn resolve_scopes(&self, regions: &mut RegionTree, blocks: &[BasicBlock<'_>]) -> Result<()> {
        let mut scopes: BTreeMap<CaptureId, RegionId> = BTreeMap::new();
        let mut written = vec![false; self.origins.len()];

        for block in blocks {
            for op in block.all_operations() {
                op.for_each_capture(&mut |id, usage| {
                    if usage == CaptureUse::Write {
                        if let Some(slot) = written.get_mut(id.0 as usize) {
                            *slot = true;
                        }
                    }
                    let scope = match scopes.get(&id) {
                        Some(&scope) => regions.common_ancestor(scope, block.region),
                        None => block.region,
                    };
                    scopes.insert(id, scope);
                });
            }
        }

        for (&id, &scope) in &scopes {
            let origin = self
                .origins
                .get(id.0 as usize)
                .copied()
                .ok_or_else(|| Error::internal(format!("capture {} was never allocated", id)))?;
            if !written[id.0 as usize] {
                return Err(Error::internal(format!(
                    "dangling capture {}: read but never written",
                    id
                )));
            }
            if !regions.is_ancestor_or_self(origin, scope) {
                return Err(Error::internal(format!(
                    "capture {} escapes {}, where it was allocated",
                    id, origin
                )));
            }
            regions.region_mut(scope)?.capture_ids.push(id);
            trace!("capture {} scoped to {}", id, scope);
        }

        Ok(())
    }
}
