//! Probe placement and body rewriting for a single method.

use crate::ids::{MethodKey, PointId};
use crate::image::stack::{self, StackDepths};
use crate::image::{CallTarget, Instruction, MethodBody, ModuleImage, SequencePoint};
use crate::result::{ProbecovError, ProbecovResult};
use std::collections::BTreeSet;

/// Number of instructions a probe adds
pub const PROBE_LEN: usize = 3;

/// Where a probe goes and what it counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSite {
    /// Original instruction the probe precedes
    pub offset: u32,
    /// Point id within the method
    pub id: PointId,
    /// Sequence point the probe is attributed to
    pub sequence_point: SequencePoint,
    /// Branch target rather than statement
    pub is_branch: bool,
}

/// Choose probe sites for a body
///
/// Statement sites come from visible sequence points whose document passes
/// `allowed`. Branch sites are the targets and fall-through successors of
/// conditional branches and switches, attributed to the nearest preceding
/// statement; a target with no preceding statement gets no probe.
pub fn probe_sites(
    body: &MethodBody,
    sequence_points: &[SequencePoint],
    allowed: impl Fn(u32) -> bool,
) -> Vec<ProbeSite> {
    let len = body.instructions.len() as u32;
    let mut statements: Vec<&SequencePoint> = sequence_points
        .iter()
        .filter(|sp| !sp.is_hidden() && sp.offset < len && allowed(sp.document))
        .collect();
    statements.sort_by_key(|sp| sp.offset);
    statements.dedup_by_key(|sp| sp.offset);

    let mut targets: BTreeSet<u32> = BTreeSet::new();
    for (offset, instruction) in body.instructions.iter().enumerate() {
        if instruction.is_conditional_branch() {
            targets.extend(instruction.branch_targets());
            targets.insert(offset as u32 + 1);
        }
    }

    let mut sites = Vec::with_capacity(statements.len() + targets.len());
    let mut next = PointId::new(1);
    let mut targets = targets.into_iter().filter(|t| *t < len).peekable();
    let mut statement_iter = statements.iter().peekable();
    let mut current: Option<&SequencePoint> = None;

    loop {
        let next_stmt = statement_iter.peek().map(|sp| sp.offset);
        let next_target = targets.peek().copied();
        let offset = match (next_stmt, next_target) {
            (None, None) => break,
            (Some(s), Some(t)) => s.min(t),
            (Some(s), None) => s,
            (None, Some(t)) => t,
        };
        if next_stmt == Some(offset) {
            if let Some(sp) = statement_iter.next() {
                current = Some(sp);
                sites.push(ProbeSite {
                    offset,
                    id: next,
                    sequence_point: (*sp).clone(),
                    is_branch: false,
                });
                next = next.next();
            }
        }
        if next_target == Some(offset) {
            targets.next();
            if let Some(sp) = current {
                sites.push(ProbeSite {
                    offset,
                    id: next,
                    sequence_point: sp.clone(),
                    is_branch: true,
                });
                next = next.next();
            }
        }
    }
    sites
}

/// A rewritten body and where each original instruction moved
#[derive(Debug, Clone)]
pub struct RewrittenBody {
    /// New body
    pub body: MethodBody,
    /// New index of every original instruction
    pub moved_to: Vec<u32>,
}

impl RewrittenBody {
    /// Move a sequence point along with its instruction
    #[must_use]
    pub fn remap_point(&self, point: &SequencePoint) -> SequencePoint {
        let mut moved = point.clone();
        if let Some(new) = self.moved_to.get(point.offset as usize) {
            moved.offset = *new;
        }
        moved
    }
}

/// Inject a probe before every site
///
/// Every branch target and exception-region boundary that named an original
/// instruction is redirected to the first probe injected before it.
#[must_use]
pub fn inject(body: &MethodBody, sites: &[ProbeSite], key: MethodKey, hit_ref: u32) -> RewrittenBody {
    let len = body.instructions.len();
    let mut instructions = Vec::with_capacity(len + sites.len() * PROBE_LEN);
    let mut block_start = vec![0_u32; len + 1];
    let mut moved_to = vec![0_u32; len];
    let mut pending = sites.iter().peekable();

    for (offset, instruction) in body.instructions.iter().enumerate() {
        block_start[offset] = instructions.len() as u32;
        while let Some(site) = pending.next_if(|s| s.offset as usize == offset) {
            instructions.push(Instruction::LdcI4(key.as_u32() as i32));
            instructions.push(Instruction::LdcI4(site.id.as_u32() as i32));
            instructions.push(Instruction::Call(CallTarget::Ref(hit_ref)));
        }
        moved_to[offset] = instructions.len() as u32;
        instructions.push(instruction.clone());
    }
    block_start[len] = instructions.len() as u32;

    let redirect = |target: u32| block_start.get(target as usize).copied().unwrap_or(target);
    for (offset, new) in moved_to.iter().enumerate() {
        if !body.instructions[offset].branch_targets().is_empty() {
            instructions[*new as usize].remap_targets(redirect);
        }
    }
    let handlers = body
        .handlers
        .iter()
        .map(|h| {
            let mut h = *h;
            h.try_start = redirect(h.try_start);
            h.try_end = redirect(h.try_end);
            h.handler_start = redirect(h.handler_start);
            h.handler_end = redirect(h.handler_end);
            h
        })
        .collect();

    RewrittenBody {
        body: MethodBody {
            max_stack: body.max_stack,
            locals: body.locals,
            instructions,
            handlers,
        },
        moved_to,
    }
}

/// Check a rewrite kept the stack shape of every original instruction
///
/// On success the rewritten body's `max_stack` is updated.
///
/// # Errors
///
/// [`ProbecovError::StackImbalance`] when either body fails analysis or an
/// original instruction sees a different height after the rewrite.
pub fn verify(
    module: &ModuleImage,
    method_name: &str,
    returns_value: bool,
    original: &MethodBody,
    rewritten: &mut RewrittenBody,
) -> ProbecovResult<StackDepths> {
    let imbalance = |offset: usize, message: String| ProbecovError::StackImbalance {
        method: method_name.to_string(),
        offset,
        message,
    };
    let before = stack::analyze(module, original, returns_value)
        .map_err(|f| imbalance(f.offset, format!("original body: {}", f.message)))?;
    let after = stack::analyze(module, &rewritten.body, returns_value)
        .map_err(|f| imbalance(f.offset, format!("rewritten body: {}", f.message)))?;

    for (offset, new) in rewritten.moved_to.iter().enumerate() {
        let expected = before.at(offset);
        let actual = after.at(*new as usize);
        if expected != actual {
            return Err(imbalance(
                offset,
                format!("height {actual:?} after rewrite, {expected:?} before"),
            ));
        }
    }
    rewritten.body.max_stack = after.max_depth();
    Ok(after)
}
