//! Shared helpers for integration tests: a small interpreter for module
//! images so original and instrumented bodies can be executed side by side.

#![allow(dead_code, clippy::unwrap_used)]

use probecov::image::{CallTarget, HandlerKind, Instruction, MemberRef, MethodBody};
use probecov::{HitRecorder, MethodKey, ModuleImage, PointId};

/// Abnormal end of an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// Exception left the outermost frame
    Uncaught(i64),
    /// Call to a token or member the image does not know
    UnknownCall(String),
    /// Stack, local or branch misuse
    Invalid(String),
    /// Step budget exhausted
    TooManySteps,
}

const STEP_LIMIT: usize = 100_000;

/// Executes methods of one image; probe calls go to `recorder`
#[derive(Debug)]
pub struct Machine<'a> {
    image: &'a ModuleImage,
    recorder: Option<&'a HitRecorder>,
    probe: Option<u32>,
    steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(image: &'a ModuleImage) -> Self {
        let probe = image
            .member_refs
            .iter()
            .position(|m| *m == MemberRef::hit_probe())
            .map(|p| p as u32);
        Self {
            image,
            recorder: None,
            probe,
            steps: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: &'a HitRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Call `Type::name` with `args`
    pub fn invoke(&mut self, type_name: &str, name: &str, args: &[i64]) -> Result<Option<i64>, Trap> {
        let token = self
            .image
            .find_method(type_name, name)
            .map(|m| m.token)
            .ok_or_else(|| Trap::UnknownCall(format!("{type_name}::{name}")))?;
        self.call(token, args.to_vec())
    }

    fn call(&mut self, token: u32, args: Vec<i64>) -> Result<Option<i64>, Trap> {
        let image = self.image;
        let method = image
            .method_by_token(token)
            .ok_or_else(|| Trap::UnknownCall(format!("token {token:#x}")))?;
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| Trap::UnknownCall(format!("{} has no body", method.name)))?;
        let returns = method.returns.is_some();
        self.run(body, args, returns)
    }

    fn run(&mut self, body: &MethodBody, mut args: Vec<i64>, returns: bool) -> Result<Option<i64>, Trap> {
        let mut locals = vec![0_i64; usize::from(body.locals)];
        let mut stack: Vec<i64> = Vec::new();
        let mut pc = 0_usize;

        loop {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(Trap::TooManySteps);
            }
            let instruction = body
                .instructions
                .get(pc)
                .ok_or_else(|| Trap::Invalid(format!("fell off the end at {pc}")))?;
            let mut next = pc + 1;

            let thrown = match instruction {
                Instruction::Nop => None,
                Instruction::LdcI4(v) => {
                    stack.push(i64::from(*v));
                    None
                }
                Instruction::LdStr(_) | Instruction::LdNull => {
                    stack.push(0);
                    None
                }
                Instruction::LdArg(i) => {
                    stack.push(*slot(&args, *i)?);
                    None
                }
                Instruction::StArg(i) => {
                    let v = pop(&mut stack)?;
                    *slot_mut(&mut args, *i)? = v;
                    None
                }
                Instruction::LdLoc(i) => {
                    stack.push(*slot(&locals, *i)?);
                    None
                }
                Instruction::StLoc(i) => {
                    let v = pop(&mut stack)?;
                    *slot_mut(&mut locals, *i)? = v;
                    None
                }
                Instruction::Dup => {
                    let v = pop(&mut stack)?;
                    stack.extend([v, v]);
                    None
                }
                Instruction::Pop => {
                    pop(&mut stack)?;
                    None
                }
                Instruction::Neg => {
                    let v = pop(&mut stack)?;
                    stack.push(v.wrapping_neg());
                    None
                }
                Instruction::Add
                | Instruction::Sub
                | Instruction::Mul
                | Instruction::Div
                | Instruction::Rem
                | Instruction::Ceq
                | Instruction::Cgt
                | Instruction::Clt => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    match binary(instruction, a, b) {
                        Some(v) => {
                            stack.push(v);
                            None
                        }
                        None => Some(-1),
                    }
                }
                Instruction::Br(t) | Instruction::Leave(t) => {
                    if matches!(instruction, Instruction::Leave(_)) {
                        stack.clear();
                    }
                    next = *t as usize;
                    None
                }
                Instruction::BrTrue(t) | Instruction::BrFalse(t) => {
                    let v = pop(&mut stack)?;
                    if (v != 0) == matches!(instruction, Instruction::BrTrue(_)) {
                        next = *t as usize;
                    }
                    None
                }
                Instruction::Beq(t) | Instruction::Bne(t) | Instruction::Blt(t) | Instruction::Bgt(t) => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    let taken = match instruction {
                        Instruction::Beq(_) => a == b,
                        Instruction::Bne(_) => a != b,
                        Instruction::Blt(_) => a < b,
                        _ => a > b,
                    };
                    if taken {
                        next = *t as usize;
                    }
                    None
                }
                Instruction::Switch(targets) => {
                    let v = pop(&mut stack)?;
                    if let Some(t) = usize::try_from(v).ok().and_then(|i| targets.get(i)) {
                        next = *t as usize;
                    }
                    None
                }
                Instruction::Call(target) => {
                    self.dispatch(*target, &mut stack)?;
                    None
                }
                Instruction::Ret => {
                    return if returns { pop(&mut stack).map(Some) } else { Ok(None) };
                }
                Instruction::Throw => Some(pop(&mut stack)?),
                Instruction::Rethrow | Instruction::EndFinally => {
                    return Err(Trap::Invalid(format!("unsupported {instruction:?}")));
                }
            };

            if let Some(exception) = thrown {
                let handler = body
                    .handlers
                    .iter()
                    .filter(|h| h.kind == HandlerKind::Catch)
                    .find(|h| (h.try_start as usize..h.try_end as usize).contains(&pc))
                    .ok_or(Trap::Uncaught(exception))?;
                stack.clear();
                stack.push(exception);
                next = handler.handler_start as usize;
            }
            pc = next;
        }
    }

    fn dispatch(&mut self, target: CallTarget, stack: &mut Vec<i64>) -> Result<(), Trap> {
        match target {
            CallTarget::Ref(index) if Some(index) == self.probe => {
                let point = pop(stack)?;
                let key = pop(stack)?;
                if let Some(recorder) = self.recorder {
                    recorder.hit(MethodKey::new(key as u32), PointId::new(point as u32));
                }
                Ok(())
            }
            CallTarget::Ref(index) => Err(Trap::UnknownCall(format!("member ref {index}"))),
            CallTarget::Def(token) => {
                let params = self
                    .image
                    .method_by_token(token)
                    .map(|m| m.params.len())
                    .ok_or_else(|| Trap::UnknownCall(format!("token {token:#x}")))?;
                if stack.len() < params {
                    return Err(Trap::Invalid("call underflow".to_string()));
                }
                let args = stack.split_off(stack.len() - params);
                if let Some(v) = self.call(token, args)? {
                    stack.push(v);
                }
                Ok(())
            }
        }
    }
}

fn binary(instruction: &Instruction, a: i64, b: i64) -> Option<i64> {
    Some(match instruction {
        Instruction::Add => a.wrapping_add(b),
        Instruction::Sub => a.wrapping_sub(b),
        Instruction::Mul => a.wrapping_mul(b),
        Instruction::Div => a.checked_div(b)?,
        Instruction::Rem => a.checked_rem(b)?,
        Instruction::Ceq => i64::from(a == b),
        Instruction::Cgt => i64::from(a > b),
        _ => i64::from(a < b),
    })
}

fn pop(stack: &mut Vec<i64>) -> Result<i64, Trap> {
    stack.pop().ok_or_else(|| Trap::Invalid("stack underflow".to_string()))
}

fn slot(values: &[i64], index: u16) -> Result<&i64, Trap> {
    values
        .get(usize::from(index))
        .ok_or_else(|| Trap::Invalid(format!("no slot {index}")))
}

fn slot_mut(values: &mut [i64], index: u16) -> Result<&mut i64, Trap> {
    values
        .get_mut(usize::from(index))
        .ok_or_else(|| Trap::Invalid(format!("no slot {index}")))
}
