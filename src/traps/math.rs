//! Math trap library: pow, sin, cos, deg, rad, i2f, f2i — each specified
//! only by its stack effect.

use crate::error::{SamError, SamResult};
use crate::stack::Stack;
use crate::trap::TrapLibrary;
use crate::word::{self, Decoded};

/// Base for every function this library answers.
pub const BASE: usize = 0x100;

const I2F: usize = 0;
const F2I: usize = 1;
const POW: usize = 2;
const SIN: usize = 3;
const COS: usize = 4;
const DEG: usize = 5;
const RAD: usize = 6;

fn pop_as_f64(data: &Stack) -> SamResult<f64> {
    let w = data.pop()?;
    match w.decode()? {
        Decoded::Int(i) => Ok(i as f64),
        Decoded::Float(f) => Ok(f),
        _ => Err(SamError::WrongType),
    }
}

fn int_pow(mut base: isize, mut exp: isize) -> isize {
    if exp < 0 {
        return 0; // no fractional representation in the integer domain
    }
    let mut acc: isize = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        exp >>= 1;
        if exp > 0 {
            base = base.wrapping_mul(base);
        }
    }
    acc
}

/// Every function is type-dispatched on the tag of its operand(s), matching
/// `ADD`/`MUL`/etc.'s own dispatch.
pub struct MathLibrary;

impl TrapLibrary for MathLibrary {
    fn call(&mut self, data: &Stack, function: usize) -> SamResult<()> {
        match function & !word::TRAP_BASE_MASK {
            I2F => {
                let v = data.pop()?;
                let i = word::decode_int(v)?;
                data.push(word::encode_float(i as f64))
            }
            F2I => {
                let v = data.pop()?;
                let f = word::decode_float(v)?;
                data.push(word::encode_int(f as isize))
            }
            POW => {
                let exp_w = data.pop()?;
                let base_w = data.pop()?;
                match (base_w.decode()?, exp_w.decode()?) {
                    (Decoded::Int(b), Decoded::Int(e)) => {
                        data.push(word::encode_int(int_pow(b, e)))
                    }
                    (b, e) => {
                        let bf = match b {
                            Decoded::Int(i) => i as f64,
                            Decoded::Float(f) => f,
                            _ => return Err(SamError::WrongType),
                        };
                        let ef = match e {
                            Decoded::Int(i) => i as f64,
                            Decoded::Float(f) => f,
                            _ => return Err(SamError::WrongType),
                        };
                        data.push(word::encode_float(bf.powf(ef)))
                    }
                }
            }
            SIN => {
                let a = pop_as_f64(data)?;
                data.push(word::encode_float(a.sin()))
            }
            COS => {
                let a = pop_as_f64(data)?;
                data.push(word::encode_float(a.cos()))
            }
            DEG => {
                let a = pop_as_f64(data)?;
                data.push(word::encode_float(a * (180.0 / std::f64::consts::PI)))
            }
            RAD => {
                let a = pop_as_f64(data)?;
                data.push(word::encode_float(a * (std::f64::consts::PI / 180.0)))
            }
            _ => Err(SamError::InvalidTrap),
        }
    }

    fn name(&self, function: usize) -> Option<&'static str> {
        Some(match function & !word::TRAP_BASE_MASK {
            I2F => "i2f",
            F2I => "f2i",
            POW => "pow",
            SIN => "sin",
            COS => "cos",
            DEG => "deg",
            RAD => "rad",
            _ => return None,
        })
    }
}
