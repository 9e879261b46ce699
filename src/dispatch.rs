//! Fetch-decode-execute dispatcher.

use crate::error::{SamError, SamResult};
use crate::frame::Frame;
use crate::stack::{Stack, StackKind};
use crate::word::{self, Decoded, Inst};
use crate::State;

/// What a single primitive instruction did to the frame chain.
enum Flow {
    /// Ordinary instruction: keep running the rest of the packed group.
    Continue,
    /// `GO`/`DO`/`IF`: a control transfer happened; stop the group —
    /// remaining packed opcodes are discarded. The frame itself was already
    /// updated in place.
    Transfer,
    /// `WHILE` with a false flag: return from the current frame. `None`
    /// means the chain is now empty.
    Returned(Option<Frame>),
}

/// A frame-shaped value to swap in while temporarily taking ownership of a
/// live `Frame` through a `&mut` reference (`DO`/`IF`/`WHILE` need to
/// consume the old frame to make it the new frame's parent). Immediately
/// overwritten or dropped; never observed mid-step.
fn placeholder_frame() -> Frame {
    Frame::new(Stack::new(StackKind::StackArray), Stack::new(StackKind::StackArray))
}

/// Reads the stack-reference word on top of `data` into a live `Stack`
/// handle, then pops the slot. Cloning the handle before popping (rather
/// than after) means the target stays alive across the pop even if `data`'s
/// slot was its only other owner.
fn pop_stack_ref(data: &Stack) -> SamResult<Stack> {
    let top = data.item(-1)?;
    let w = data.peek(top)?;
    // SAFETY: `w` is the live top-of-stack slot of a stack we hold a
    // reference into; whatever it names is therefore still alive.
    let s = unsafe { Stack::from_word(w) }?;
    data.pop()?;
    Ok(s)
}

#[derive(Clone, Copy)]
enum Num {
    Int(isize),
    Float(f64),
}

fn pop_num(data: &Stack) -> SamResult<Num> {
    match data.pop()?.decode()? {
        Decoded::Int(i) => Ok(Num::Int(i)),
        Decoded::Float(f) => Ok(Num::Float(f)),
        _ => Err(SamError::WrongType),
    }
}

fn push_num(data: &Stack, n: Num) -> SamResult<()> {
    match n {
        Num::Int(i) => data.push(word::encode_int(i)),
        Num::Float(f) => data.push(word::encode_float(f)),
    }
}

fn push_bool(data: &Stack, b: bool) -> SamResult<()> {
    data.push(word::encode_int(if b { -1 } else { 0 }))
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn arith(a: Num, b: Num, fi: impl Fn(isize, isize) -> isize, ff: impl Fn(f64, f64) -> f64) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(fi(x, y)),
        _ => Num::Float(ff(as_f64(a), as_f64(b))),
    }
}

impl State {
    /// Runs until halt or a fatal error, returning the packed error word.
    pub fn run(&mut self) -> isize {
        loop {
            match self.step() {
                Ok(()) => continue,
                Err(e) => {
                    log::debug!("run terminated: {e}");
                    return e.to_word();
                }
            }
        }
    }

    /// Executes one fetch-decode-execute cycle. On any error the frame —
    /// mutated up to the point of failure — is put back into `self.frame`
    /// so the program counter and data stack stay inspectable afterward,
    /// except when the chain has genuinely emptied (there is nothing left
    /// to keep).
    fn step(&mut self) -> SamResult<()> {
        let mut frame = self.frame.take().expect("State::run called without a program");

        if frame.at_end() {
            if frame.has_parent() {
                self.frame = frame.into_parent();
                return Ok(());
            }
            // The root frame's code ran off the end with no explicit HALT.
            // Treat as a clean exit (return code 0), keeping the frame
            // around for inspection the same way any other halt does.
            self.frame = Some(frame);
            return Err(SamError::Halt(0));
        }

        let ir = match frame.code().peek(frame.pc()) {
            Ok(w) => w,
            Err(e) => {
                self.frame = Some(frame);
                return Err(e);
            }
        };
        frame.advance();
        log::trace!("pc={} ir={:?}", frame.pc() - 1, ir);

        let decoded = match ir.decode() {
            Ok(d) => d,
            Err(e) => {
                self.frame = Some(frame);
                return Err(e);
            }
        };

        match decoded {
            Decoded::Int(_) | Decoded::Float(_) | Decoded::Ref(_) => {
                if let Err(e) = frame.data().push(ir) {
                    self.frame = Some(frame);
                    return Err(e);
                }
                self.frame = Some(frame);
            }
            Decoded::Atom { .. } => {
                self.frame = Some(frame);
                return Err(SamError::InvalidOpcode);
            }
            Decoded::Trap(function) => {
                let data = frame.data().clone();
                if let Err(e) = self.traps.dispatch(&data, function) {
                    self.frame = Some(frame);
                    return Err(e);
                }
                self.frame = Some(frame);
            }
            Decoded::Insts(seq) => {
                for inst in seq {
                    match exec_inst(&mut frame, inst) {
                        Ok(Flow::Continue) => continue,
                        Ok(Flow::Transfer) => {
                            self.frame = Some(frame);
                            return self.poll();
                        }
                        Ok(Flow::Returned(Some(parent))) => {
                            self.frame = Some(parent);
                            return self.poll();
                        }
                        Ok(Flow::Returned(None)) => return Err(SamError::Halt(0)),
                        Err(e) => {
                            self.frame = Some(frame);
                            return Err(e);
                        }
                    }
                }
                self.frame = Some(frame);
            }
        }
        self.poll()
    }

    fn poll(&mut self) -> SamResult<()> {
        if let Some(hook) = self.config.event_poll.as_mut() {
            hook()?;
        }
        Ok(())
    }
}

/// Executes one primitive opcode against `frame`.
fn exec_inst(frame: &mut Frame, inst: Inst) -> SamResult<Flow> {
    use Inst::*;
    // An owned handle (a cheap `Rc` clone), not a borrow of `frame` — `DO`,
    // `IF`, and `WHILE` below need to reborrow `frame` mutably.
    let data = frame.data().clone();
    let data = &data;
    match inst {
        Nop => Ok(Flow::Continue),
        Pop => {
            data.pop()?;
            Ok(Flow::Continue)
        }
        Get => {
            let index = word::decode_int(data.pop()?)?;
            let addr = data.item(index)?;
            let v = data.peek(addr)?;
            data.push(v)?;
            Ok(Flow::Continue)
        }
        Set => {
            let index = word::decode_int(data.pop()?)?;
            let v = data.pop()?;
            let addr = data.item(index)?;
            data.poke(addr, v)?;
            Ok(Flow::Continue)
        }
        Extract => {
            let index = word::decode_int(data.pop()?)?;
            let addr = data.item(index)?;
            data.extract(addr)?;
            Ok(Flow::Continue)
        }
        Insert => {
            let index = word::decode_int(data.pop()?)?;
            let addr = data.item(index)?;
            data.insert(addr)?;
            Ok(Flow::Continue)
        }
        IGet => {
            let s = pop_stack_ref(data)?;
            let index = word::decode_int(data.pop()?)?;
            let addr = s.item(index)?;
            let v = s.peek(addr)?;
            data.push(v)?;
            Ok(Flow::Continue)
        }
        ISet => {
            let s = pop_stack_ref(data)?;
            let index = word::decode_int(data.pop()?)?;
            let v = data.pop()?;
            let addr = s.item(index)?;
            s.poke(addr, v)?;
            Ok(Flow::Continue)
        }
        Go => {
            let target = pop_stack_ref(data)?;
            frame.go(target);
            Ok(Flow::Transfer)
        }
        Do => {
            let target = pop_stack_ref(data)?;
            let old = std::mem::replace(frame, placeholder_frame());
            *frame = old.call(target);
            Ok(Flow::Transfer)
        }
        If => {
            let else_ref = pop_stack_ref(data)?;
            let then_ref = pop_stack_ref(data)?;
            let flag = word::decode_int(data.pop()?)?;
            let chosen = if flag != 0 { then_ref } else { else_ref };
            let old = std::mem::replace(frame, placeholder_frame());
            *frame = old.call(chosen);
            Ok(Flow::Transfer)
        }
        While => {
            let flag = word::decode_int(data.pop()?)?;
            if flag == 0 {
                let old = std::mem::replace(frame, placeholder_frame());
                Ok(Flow::Returned(old.into_parent()))
            } else {
                Ok(Flow::Continue)
            }
        }
        Not => {
            let v = word::decode_int(data.pop()?)?;
            data.push(word::encode_int(!v))?;
            Ok(Flow::Continue)
        }
        And => {
            let b = word::decode_int(data.pop()?)?;
            let a = word::decode_int(data.pop()?)?;
            data.push(word::encode_int(a & b))?;
            Ok(Flow::Continue)
        }
        Or => {
            let b = word::decode_int(data.pop()?)?;
            let a = word::decode_int(data.pop()?)?;
            data.push(word::encode_int(a | b))?;
            Ok(Flow::Continue)
        }
        Xor => {
            let b = word::decode_int(data.pop()?)?;
            let a = word::decode_int(data.pop()?)?;
            data.push(word::encode_int(a ^ b))?;
            Ok(Flow::Continue)
        }
        Lsh => {
            let sh = word::decode_int(data.pop()?)?;
            let v = word::decode_uint(data.pop()?)?;
            let bits = usize::BITS as isize;
            let r = if sh < 0 || sh >= bits { 0 } else { v << sh };
            data.push(word::encode_uint(r))?;
            Ok(Flow::Continue)
        }
        Rsh => {
            let sh = word::decode_int(data.pop()?)?;
            let v = word::decode_uint(data.pop()?)?;
            let bits = usize::BITS as isize;
            let r = if sh < 0 || sh >= bits { 0 } else { v >> sh };
            data.push(word::encode_uint(r))?;
            Ok(Flow::Continue)
        }
        Arsh => {
            let sh = word::decode_int(data.pop()?)?;
            let v = word::decode_int(data.pop()?)?;
            let bits = usize::BITS as isize;
            let r = if sh < 0 || sh >= bits {
                if v < 0 {
                    -1
                } else {
                    0
                }
            } else {
                v >> sh
            };
            data.push(word::encode_int(r))?;
            Ok(Flow::Continue)
        }
        Neg => {
            let n = pop_num(data)?;
            push_num(
                data,
                match n {
                    Num::Int(i) => Num::Int(i.wrapping_neg()),
                    Num::Float(f) => Num::Float(-f),
                },
            )?;
            Ok(Flow::Continue)
        }
        Add => {
            let b = pop_num(data)?;
            let a = pop_num(data)?;
            push_num(data, arith(a, b, |x, y| x.wrapping_add(y), |x, y| x + y))?;
            Ok(Flow::Continue)
        }
        Mul => {
            let b = pop_num(data)?;
            let a = pop_num(data)?;
            push_num(data, arith(a, b, |x, y| x.wrapping_mul(y), |x, y| x * y))?;
            Ok(Flow::Continue)
        }
        Div => {
            let b = pop_num(data)?;
            let a = pop_num(data)?;
            let r = match (a, b) {
                (Num::Int(x), Num::Int(y)) => Num::Int(if y == 0 {
                    0
                } else if x == isize::MIN && y == -1 {
                    isize::MIN
                } else {
                    x.wrapping_div(y)
                }),
                _ => {
                    let (x, y) = (as_f64(a), as_f64(b));
                    Num::Float(if y == 0.0 { 0.0 } else { x / y })
                }
            };
            push_num(data, r)?;
            Ok(Flow::Continue)
        }
        Rem => {
            let b = pop_num(data)?;
            let a = pop_num(data)?;
            // Unlike DIV, REM reinterprets both operands as unsigned before
            // taking the remainder, then stores the bit pattern back as a
            // signed int — no sign-overflow case exists at that width.
            let r = match (a, b) {
                (Num::Int(x), Num::Int(y)) => Num::Int(if y == 0 {
                    x
                } else {
                    (x as usize).wrapping_rem(y as usize) as isize
                }),
                _ => {
                    let (x, y) = (as_f64(a), as_f64(b));
                    Num::Float(if y == 0.0 { x } else { x % y })
                }
            };
            push_num(data, r)?;
            Ok(Flow::Continue)
        }
        Eq => {
            let b = data.pop()?;
            let a = data.pop()?;
            push_bool(data, a == b)?;
            Ok(Flow::Continue)
        }
        Lt => {
            let b = pop_num(data)?;
            let a = pop_num(data)?;
            let lt = match (a, b) {
                (Num::Int(x), Num::Int(y)) => x < y,
                _ => as_f64(a) < as_f64(b),
            };
            push_bool(data, lt)?;
            Ok(Flow::Continue)
        }
        Zero => {
            data.push(word::encode_int(0))?;
            Ok(Flow::Continue)
        }
        One => {
            data.push(word::encode_int(1))?;
            Ok(Flow::Continue)
        }
        MinusOne => {
            data.push(word::encode_int(-1))?;
            Ok(Flow::Continue)
        }
        Two => {
            data.push(word::encode_int(2))?;
            Ok(Flow::Continue)
        }
        MinusTwo => {
            data.push(word::encode_int(-2))?;
            Ok(Flow::Continue)
        }
        Halt => {
            let ret = word::decode_int(data.pop()?)?;
            Err(SamError::Halt(ret))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::Inst::*;

    fn fresh_frame() -> Frame {
        Frame::new(Stack::new(StackKind::StackArray), Stack::new(StackKind::StackArray))
    }

    fn top_int(frame: &Frame) -> isize {
        let data = frame.data();
        let addr = data.item(-1).unwrap();
        word::decode_int(data.peek(addr).unwrap()).unwrap()
    }

    #[test]
    fn get_copies_without_removing() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(10)).unwrap();
        frame.data().push(word::encode_int(20)).unwrap();
        frame.data().push(word::encode_int(0)).unwrap(); // index
        exec_inst(&mut frame, Get).unwrap();
        assert_eq!(top_int(&frame), 10);
        assert_eq!(frame.data().count(), 3);
    }

    #[test]
    fn set_overwrites_item_in_place() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(10)).unwrap();
        frame.data().push(word::encode_int(20)).unwrap();
        frame.data().push(word::encode_int(99)).unwrap(); // value
        frame.data().push(word::encode_int(0)).unwrap(); // index
        exec_inst(&mut frame, Set).unwrap();
        assert_eq!(frame.data().count(), 2);
        let addr0 = frame.data().item(0).unwrap();
        assert_eq!(word::decode_int(frame.data().peek(addr0).unwrap()).unwrap(), 99);
    }

    #[test]
    fn iget_reads_through_a_stack_reference() {
        let mut frame = fresh_frame();
        let inner = Stack::new(StackKind::StackArray);
        inner.push(word::encode_int(42)).unwrap();
        frame.data().push(word::encode_int(0)).unwrap(); // index, below
        frame.data().push(inner.as_word()).unwrap(); // stack reference, topmost
        exec_inst(&mut frame, IGet).unwrap();
        assert_eq!(top_int(&frame), 42);
    }

    #[test]
    fn iset_writes_through_a_stack_reference() {
        let mut frame = fresh_frame();
        let inner = Stack::new(StackKind::StackArray);
        inner.push(word::encode_int(0)).unwrap();
        frame.data().push(word::encode_int(77)).unwrap(); // value, bottom-most
        frame.data().push(word::encode_int(0)).unwrap(); // index
        frame.data().push(inner.as_word()).unwrap(); // stack reference, topmost
        exec_inst(&mut frame, ISet).unwrap();
        let addr0 = inner.item(0).unwrap();
        assert_eq!(word::decode_int(inner.peek(addr0).unwrap()).unwrap(), 77);
    }

    #[test]
    fn go_replaces_code_without_growing_the_chain() {
        let mut frame = fresh_frame();
        let target = Stack::new(StackKind::StackArray);
        frame.data().push(target.as_word()).unwrap();
        let flow = exec_inst(&mut frame, Go).unwrap();
        assert!(matches!(flow, Flow::Transfer));
        assert!(!frame.has_parent());
        assert_eq!(frame.pc(), 0);
        assert!(*frame.code() == target);
    }

    #[test]
    fn if_true_calls_the_then_branch() {
        let mut frame = fresh_frame();
        let then_branch = Stack::new(StackKind::StackArray);
        let else_branch = Stack::new(StackKind::StackArray);
        frame.data().push(word::encode_int(1)).unwrap(); // flag
        frame.data().push(then_branch.as_word()).unwrap();
        frame.data().push(else_branch.as_word()).unwrap();
        let flow = exec_inst(&mut frame, If).unwrap();
        assert!(matches!(flow, Flow::Transfer));
        assert!(frame.has_parent());
        assert!(*frame.code() == then_branch);
    }

    #[test]
    fn if_false_calls_the_else_branch() {
        let mut frame = fresh_frame();
        let then_branch = Stack::new(StackKind::StackArray);
        let else_branch = Stack::new(StackKind::StackArray);
        frame.data().push(word::encode_int(0)).unwrap(); // flag
        frame.data().push(then_branch.as_word()).unwrap();
        frame.data().push(else_branch.as_word()).unwrap();
        exec_inst(&mut frame, If).unwrap();
        assert!(*frame.code() == else_branch);
    }

    #[test]
    fn while_true_keeps_running_the_current_frame() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(1)).unwrap();
        let flow = exec_inst(&mut frame, While).unwrap();
        assert!(matches!(flow, Flow::Continue));
    }

    #[test]
    fn while_false_returns_to_the_parent_frame() {
        let root = fresh_frame();
        let child_code = Stack::new(StackKind::StackArray);
        let mut frame = root.call(child_code);
        frame.data().push(word::encode_int(0)).unwrap();
        match exec_inst(&mut frame, While).unwrap() {
            Flow::Returned(Some(parent)) => assert!(!parent.has_parent()),
            _ => panic!("expected Returned(Some(_))"),
        }
    }

    #[test]
    fn bitwise_ops_match_truth_tables() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(0b110)).unwrap();
        frame.data().push(word::encode_int(0b011)).unwrap();
        exec_inst(&mut frame, And).unwrap();
        assert_eq!(top_int(&frame), 0b010);

        frame.data().push(word::encode_int(0b100)).unwrap();
        exec_inst(&mut frame, Or).unwrap();
        assert_eq!(top_int(&frame), 0b110);

        frame.data().push(word::encode_int(0b011)).unwrap();
        exec_inst(&mut frame, Xor).unwrap();
        assert_eq!(top_int(&frame), 0b101);
    }

    #[test]
    fn logical_shifts_ignore_sign() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(1)).unwrap();
        frame.data().push(word::encode_int(4)).unwrap();
        exec_inst(&mut frame, Lsh).unwrap();
        assert_eq!(top_int(&frame), 16);

        frame.data().push(word::encode_int(4)).unwrap();
        exec_inst(&mut frame, Rsh).unwrap();
        assert_eq!(top_int(&frame), 1);
    }

    #[test]
    fn arithmetic_shift_preserves_sign() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(-8)).unwrap();
        frame.data().push(word::encode_int(1)).unwrap();
        exec_inst(&mut frame, Arsh).unwrap();
        assert_eq!(top_int(&frame), -4);
    }

    #[test]
    fn neg_flips_sign() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(7)).unwrap();
        exec_inst(&mut frame, Neg).unwrap();
        assert_eq!(top_int(&frame), -7);
    }

    #[test]
    fn mul_multiplies_integers() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(6)).unwrap();
        frame.data().push(word::encode_int(7)).unwrap();
        exec_inst(&mut frame, Mul).unwrap();
        assert_eq!(top_int(&frame), 42);
    }

    #[test]
    fn eq_compares_raw_words() {
        let mut frame = fresh_frame();
        frame.data().push(word::encode_int(5)).unwrap();
        frame.data().push(word::encode_int(5)).unwrap();
        exec_inst(&mut frame, Eq).unwrap();
        assert_eq!(top_int(&frame), -1);

        frame.data().push(word::encode_int(5)).unwrap();
        frame.data().push(word::encode_int(6)).unwrap();
        exec_inst(&mut frame, Eq).unwrap();
        assert_eq!(top_int(&frame), 0);
    }

    #[test]
    fn constant_push_opcodes_produce_their_values() {
        let mut frame = fresh_frame();
        for (inst, expected) in [(Zero, 0), (One, 1), (MinusOne, -1), (Two, 2), (MinusTwo, -2)] {
            exec_inst(&mut frame, inst).unwrap();
            assert_eq!(top_int(&frame), expected);
        }
    }
}
