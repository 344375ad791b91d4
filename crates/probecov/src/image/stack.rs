//! Evaluation-stack analysis.
//!
//! Computes the stack height on entry to every reachable instruction by
//! walking the control-flow graph. The instrumentation engine runs it on both
//! the original and the rewritten body: every original instruction must see
//! the same height before and after probes were injected.

use super::{HandlerKind, Instruction, MethodBody, ModuleImage};
use std::fmt;

/// Stack heights of a method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDepths {
    depths: Vec<Option<u16>>,
    max: u16,
}

impl StackDepths {
    /// Height on entry to `offset`, `None` when unreachable
    #[must_use]
    pub fn at(&self, offset: usize) -> Option<u16> {
        self.depths.get(offset).copied().flatten()
    }

    /// Highest stack the body ever builds
    #[must_use]
    pub const fn max_depth(&self) -> u16 {
        self.max
    }

    /// Number of instructions analyzed
    #[must_use]
    pub fn len(&self) -> usize {
        self.depths.len()
    }

    /// Whether the body was empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }
}

/// Why a body failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFault {
    /// Instruction index
    pub offset: usize,
    /// What went wrong
    pub message: String,
}

impl StackFault {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for StackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instruction {}: {}", self.offset, self.message)
    }
}

/// Values popped and pushed by an instruction
fn effect(
    module: &ModuleImage,
    instruction: &Instruction,
    returns_value: bool,
) -> Option<(u16, u16)> {
    use Instruction as I;
    let effect = match instruction {
        I::Nop | I::Br(_) | I::Rethrow | I::Leave(_) | I::EndFinally => (0, 0),
        I::LdcI4(_) | I::LdStr(_) | I::LdNull | I::LdArg(_) | I::LdLoc(_) => (0, 1),
        I::StArg(_) | I::StLoc(_) | I::Pop | I::Throw => (1, 0),
        I::BrTrue(_) | I::BrFalse(_) | I::Switch(_) => (1, 0),
        I::Dup => (1, 2),
        I::Neg => (1, 1),
        I::Add | I::Sub | I::Mul | I::Div | I::Rem | I::Ceq | I::Cgt | I::Clt => (2, 1),
        I::Beq(_) | I::Bne(_) | I::Blt(_) | I::Bgt(_) => (2, 0),
        I::Call(target) => {
            let (params, returns) = module.call_signature(*target)?;
            (params as u16, u16::from(returns))
        }
        I::Ret => (u16::from(returns_value), 0),
    };
    Some(effect)
}

/// Analyze a method body
///
/// # Errors
///
/// Returns the first fault found: underflow, disagreeing heights where
/// control flow merges, branches out of range, falling off the end, a
/// non-empty stack at `Ret` or entering a protected region, or an unknown
/// call target.
pub fn analyze(
    module: &ModuleImage,
    body: &MethodBody,
    returns_value: bool,
) -> Result<StackDepths, StackFault> {
    let len = body.instructions.len();
    let mut depths: Vec<Option<u16>> = vec![None; len];
    let mut max = 0_u16;
    let mut work: Vec<(usize, u16)> = Vec::new();

    if len > 0 {
        work.push((0, 0));
    }
    for handler in &body.handlers {
        let entry = match handler.kind {
            HandlerKind::Catch => 1,
            HandlerKind::Finally | HandlerKind::Fault => 0,
        };
        let start = handler.handler_start as usize;
        if start >= len || handler.try_start > handler.try_end || handler.try_end as usize > len {
            return Err(StackFault::new(start, "exception region out of range"));
        }
        work.push((start, entry));
        max = max.max(entry);
    }

    while let Some((offset, depth)) = work.pop() {
        if offset >= len {
            return Err(StackFault::new(offset, "control flow leaves the method body"));
        }
        match depths[offset] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(StackFault::new(
                    offset,
                    format!("stack height {depth} disagrees with {seen}"),
                ))
            }
            None => depths[offset] = Some(depth),
        }

        let instruction = &body.instructions[offset];
        let (pops, pushes) = effect(module, instruction, returns_value)
            .ok_or_else(|| StackFault::new(offset, "unknown call target"))?;
        if depth < pops {
            return Err(StackFault::new(
                offset,
                format!("pops {pops} from a stack of {depth}"),
            ));
        }
        let after = depth - pops + pushes;
        max = max.max(after).max(depth);

        match instruction {
            Instruction::Ret if after != 0 => {
                return Err(StackFault::new(offset, format!("{after} values left at return")));
            }
            Instruction::Leave(target) => {
                check_target(offset, *target, len)?;
                work.push((*target as usize, 0));
            }
            other => {
                for target in other.branch_targets() {
                    check_target(offset, target, len)?;
                    work.push((target as usize, after));
                }
                if other.falls_through() {
                    work.push((offset + 1, after));
                }
            }
        }
    }

    for handler in &body.handlers {
        if let Some(depth) = depths.get(handler.try_start as usize).copied().flatten() {
            if depth != 0 {
                return Err(StackFault::new(
                    handler.try_start as usize,
                    format!("protected region entered with {depth} values on the stack"),
                ));
            }
        }
    }

    Ok(StackDepths { depths, max })
}

fn check_target(offset: usize, target: u32, len: usize) -> Result<(), StackFault> {
    if target as usize >= len {
        return Err(StackFault::new(
            offset,
            format!("branch target {target} out of range"),
        ));
    }
    Ok(())
}
