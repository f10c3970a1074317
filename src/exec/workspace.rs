//! Scalars and arrays a nest runs over.

use crate::frontend::{Fill, InputSpec};
use crate::space::Value;
use crate::utils::errors::ExecError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A scalar value with C's int/double distinction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    /// Integer
    Int(i64),
    /// Double
    Float(f64),
}

impl Num {
    /// Numeric value as a double.
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }

    /// Integer value, if exact.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Num::Int(v) => Some(v),
            Num::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(v as i64),
            Num::Float(_) => None,
        }
    }

    /// C truth value.
    pub fn truthy(self) -> bool {
        match self {
            Num::Int(v) => v != 0,
            Num::Float(v) => v != 0.0,
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(v) => write!(f, "{}", v),
            Num::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A dense row-major array of doubles.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// Extents, outermost first
    pub dims: Vec<usize>,
    /// Elements
    pub data: Vec<f64>,
}

impl Array {
    /// Array of `dims` filled with `value`.
    pub fn filled(dims: &[usize], value: f64) -> Self {
        Self { dims: dims.to_vec(), data: vec![value; dims.iter().product()] }
    }

    /// Flat offset of a subscript tuple, if in bounds.
    pub fn offset(&self, index: &[i64]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut off = 0usize;
        for (&i, &d) in index.iter().zip(&self.dims) {
            if i < 0 || i as usize >= d {
                return None;
            }
            off = off * d + i as usize;
        }
        Some(off)
    }
}

/// Named scalars and arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workspace {
    scalars: HashMap<String, Num>,
    arrays: BTreeMap<String, Array>,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize the declared inputs: parameters bound to their first
    /// value and arrays filled as declared. Random fills are seeded from
    /// `seed` and the declaration position, so two workspaces built with
    /// the same seed are identical.
    pub fn from_inputs(inputs: &InputSpec, seed: u64) -> Result<Self, ExecError> {
        let mut ws = Self::new();
        for (name, value) in inputs.constants() {
            let num = match value {
                Value::Float(v) => Num::Float(v),
                other => Num::Int(other.as_int().ok_or_else(|| {
                    ExecError::NotAnInteger(format!("input parameter '{}' = {}", name, other))
                })?),
            };
            ws.set(&name, num);
        }
        for (pos, decl) in inputs.arrays.iter().enumerate() {
            let stream = seed.wrapping_add(pos as u64);
            match decl.fill {
                Fill::Random => ws.alloc_random(&decl.name, &decl.dims, stream),
                Fill::Zero => ws.alloc_zero(&decl.name, &decl.dims),
                Fill::Constant(v) => ws.alloc_filled(&decl.name, &decl.dims, v),
            }
        }
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5ca1a5);
        for decl in &inputs.scalars {
            let value = match decl.fill {
                Fill::Random => rng.gen_range(0.0..1.0),
                Fill::Zero => 0.0,
                Fill::Constant(v) => v,
            };
            if matches!(decl.elem_type.as_str(), "int" | "long") {
                ws.set_int(&decl.name, value as i64);
            } else {
                ws.set_float(&decl.name, value);
            }
        }
        Ok(ws)
    }

    /// Bind a scalar.
    pub fn set(&mut self, name: &str, value: Num) {
        self.scalars.insert(name.to_string(), value);
    }

    /// Bind an integer scalar.
    pub fn set_int(&mut self, name: &str, value: i64) {
        self.set(name, Num::Int(value));
    }

    /// Bind a double scalar.
    pub fn set_float(&mut self, name: &str, value: f64) {
        self.set(name, Num::Float(value));
    }

    /// Value of a scalar.
    pub fn get(&self, name: &str) -> Option<Num> {
        self.scalars.get(name).copied()
    }

    /// Remove a scalar binding, returning its value.
    pub fn unset(&mut self, name: &str) -> Option<Num> {
        self.scalars.remove(name)
    }

    /// Value of a scalar as a double.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.get(name).map(Num::as_f64)
    }

    /// Allocate a zeroed array.
    pub fn alloc_zero(&mut self, name: &str, dims: &[usize]) {
        self.alloc_filled(name, dims, 0.0);
    }

    /// Allocate an array with every element set to `value`.
    pub fn alloc_filled(&mut self, name: &str, dims: &[usize], value: f64) {
        self.arrays.insert(name.to_string(), Array::filled(dims, value));
    }

    /// Allocate an array of seeded uniform values in `[0, 1)`.
    pub fn alloc_random(&mut self, name: &str, dims: &[usize], seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut array = Array::filled(dims, 0.0);
        array.data.iter_mut().for_each(|x| *x = rng.gen_range(0.0..1.0));
        self.arrays.insert(name.to_string(), array);
    }

    /// Elements of an array.
    pub fn array(&self, name: &str) -> Option<&[f64]> {
        self.arrays.get(name).map(|a| a.data.as_slice())
    }

    /// Array with its extents.
    pub fn array_entry(&self, name: &str) -> Option<&Array> {
        self.arrays.get(name)
    }

    pub(crate) fn array_mut(&mut self, name: &str) -> Option<&mut Array> {
        self.arrays.get_mut(name)
    }

    /// Arrays in name order.
    pub fn arrays(&self) -> impl Iterator<Item = (&String, &Array)> {
        self.arrays.iter()
    }

    /// Compare every array of `self` against `other`, elementwise within a
    /// relative tolerance.
    pub fn compare_arrays(&self, other: &Workspace, tolerance: f64) -> Result<(), String> {
        for (name, expected) in &self.arrays {
            let actual = other.arrays.get(name).ok_or_else(|| format!("array '{}' is missing", name))?;
            if actual.dims != expected.dims {
                return Err(format!("array '{}' has dims {:?}, expected {:?}", name, actual.dims, expected.dims));
            }
            for (i, (a, e)) in actual.data.iter().zip(&expected.data).enumerate() {
                let scale = e.abs().max(1.0);
                if (a - e).abs() > tolerance * scale || a.is_nan() != e.is_nan() {
                    return Err(format!("{}[{}] = {} differs from expected {}", name, i, a, e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{ArrayDecl, InputParam, ScalarDecl};

    #[test]
    fn test_offsets() {
        let a = Array::filled(&[3, 4], 0.0);
        assert_eq!(a.offset(&[0, 0]), Some(0));
        assert_eq!(a.offset(&[2, 3]), Some(11));
        assert_eq!(a.offset(&[3, 0]), None);
        assert_eq!(a.offset(&[-1, 0]), None);
        assert_eq!(a.offset(&[1]), None);
    }

    #[test]
    fn test_from_inputs_is_deterministic() {
        let inputs = InputSpec {
            params: vec![InputParam { name: "N".into(), values: vec![Value::Int(8), Value::Int(16)] }],
            arrays: vec![
                ArrayDecl { name: "x".into(), elem_type: "double".into(), dims: vec![8], fill: Fill::Random, is_static: false },
                ArrayDecl { name: "y".into(), elem_type: "double".into(), dims: vec![8], fill: Fill::Zero, is_static: false },
            ],
            scalars: vec![ScalarDecl { name: "a".into(), elem_type: "double".into(), fill: Fill::Constant(2.5) }],
            ..InputSpec::default()
        };
        let ws = Workspace::from_inputs(&inputs, 42).unwrap();
        assert_eq!(ws.get("N"), Some(Num::Int(8)));
        assert_eq!(ws.scalar("a"), Some(2.5));
        assert_eq!(ws.array("y").unwrap(), &[0.0; 8]);
        assert!(ws.array("x").unwrap().iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(ws, Workspace::from_inputs(&inputs, 42).unwrap());
    }

    #[test]
    fn test_compare_arrays() {
        let mut a = Workspace::new();
        a.alloc_filled("v", &[2], 1.0);
        let mut b = a.clone();
        assert!(a.compare_arrays(&b, 1e-9).is_ok());
        b.array_mut("v").unwrap().data[1] = 1.5;
        let msg = a.compare_arrays(&b, 1e-9).unwrap_err();
        assert!(msg.contains("v[1]"));
    }
}
