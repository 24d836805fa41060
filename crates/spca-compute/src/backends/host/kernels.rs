//! Host kernel registry and the built-in benchmark kernels
//!
//! A host "kernel" is a Rust function registered under the entry-point name a
//! device program would declare. Arguments arrive in binding order as
//! [`HostArg`]s. Output buffers are only reachable through
//! [`HostArgs::split_output`], which refuses read-only buffers.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::backend::{MemAccess, NdRange2};
use crate::kernels::{BANDWIDTH_ENTRY, CONV_FP32_ENTRY};

pub type HostKernelFn = Arc<dyn Fn(&NdRange2, &mut HostArgs) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct HostKernel {
    pub arity: usize,
    pub func: HostKernelFn,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel").field("arity", &self.arity).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostKernelRegistry {
    kernels: HashMap<String, HostKernel>,
}

impl HostKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the copy and convolution benchmark kernels.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(BANDWIDTH_ENTRY, 2, Arc::new(matrix_copy));
        registry.register(CONV_FP32_ENTRY, 5, Arc::new(matrix_conv));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, arity: usize, func: HostKernelFn) {
        self.kernels.insert(name.into(), HostKernel { arity, func });
    }

    pub fn get(&self, name: &str) -> Option<&HostKernel> {
        self.kernels.get(name)
    }
}

/// One bound kernel argument.
#[derive(Debug)]
pub struct HostArg {
    pub access: MemAccess,
    pub data: Vec<f32>,
}

/// Arguments of one dispatch in binding order.
#[derive(Debug)]
pub struct HostArgs {
    args: Vec<HostArg>,
}

impl HostArgs {
    pub(crate) fn new(args: Vec<HostArg>) -> Self {
        Self { args }
    }

    pub(crate) fn into_inner(self) -> Vec<HostArg> {
        self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn input(&self, index: usize) -> Result<&[f32], String> {
        self.args
            .get(index)
            .map(|arg| arg.data.as_slice())
            .ok_or_else(|| format!("argument {index} not bound"))
    }

    /// Borrow argument `output` for writing and every other argument for reading.
    pub fn split_output(&mut self, output: usize) -> Result<(ReadArgs<'_>, &mut [f32]), String> {
        if output >= self.args.len() {
            return Err(format!("argument {output} not bound"));
        }
        let (before, rest) = self.args.split_at_mut(output);
        let (target, after) = rest
            .split_first_mut()
            .ok_or_else(|| format!("argument {output} not bound"))?;
        if target.access == MemAccess::ReadOnly {
            return Err(format!("argument {output} is read-only"));
        }
        let reads = ReadArgs {
            before,
            after,
            output,
        };
        Ok((reads, target.data.as_mut_slice()))
    }
}

/// Read view over every argument except the one split out for writing.
#[derive(Debug)]
pub struct ReadArgs<'a> {
    before: &'a [HostArg],
    after: &'a [HostArg],
    output: usize,
}

impl ReadArgs<'_> {
    pub fn get(&self, index: usize) -> Result<&[f32], String> {
        let arg = match index.cmp(&self.output) {
            std::cmp::Ordering::Less => self.before.get(index),
            std::cmp::Ordering::Equal => return Err(format!("argument {index} is the write target")),
            std::cmp::Ordering::Greater => self.after.get(index - self.output - 1),
        };
        arg.map(|arg| arg.data.as_slice())
            .ok_or_else(|| format!("argument {index} not bound"))
    }
}

fn require_len(name: &str, slice: &[f32], needed: usize) -> Result<(), String> {
    if slice.len() < needed {
        return Err(format!("{name}: access past end ({} < {needed} elements)", slice.len()));
    }
    Ok(())
}

/// `out[j * w + i] = in[j * w + i]` over the global range.
fn matrix_copy(range: &NdRange2, args: &mut HostArgs) -> Result<(), String> {
    let [width, height] = range.global;
    let items = width * height;
    let (reads, out) = args.split_output(1)?;
    let input = reads.get(0)?;
    require_len("MatrixIn", input, items)?;
    require_len("MatrixOut", out, items)?;

    out[..items]
        .par_chunks_mut(width.max(1))
        .zip(input[..items].par_chunks(width.max(1)))
        .for_each(|(dst, src)| dst.copy_from_slice(src));
    Ok(())
}

/// Two-kernel weighted convolution with a 32-step blend per tap.
fn matrix_conv(range: &NdRange2, args: &mut HostArgs) -> Result<(), String> {
    let [width, height] = range.global;
    let items = width * height;
    let (reads, out) = args.split_output(4)?;
    let input = reads.get(0)?;
    let conv_a = reads.get(1)?;
    let conv_b = reads.get(2)?;
    let params = reads.get(3)?;

    require_len("ConvParam", params, 2)?;
    let range_x = params[0].max(0.0) as usize;
    let range_y = params[1].max(0.0) as usize;
    require_len("MatrixIn", input, items)?;
    require_len("ConvKernelA", conv_a, range_x * range_y)?;
    require_len("ConvKernelB", conv_b, range_x * range_y)?;
    require_len("MatrixOut", out, items)?;

    let center_x = (range_x / 2) as isize;
    let center_y = (range_y / 2) as isize;

    out[..items]
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(j, row)| {
            for (i, cell) in row.iter_mut().enumerate() {
                let mut result = 0.0f32;
                for kx in 0..range_x {
                    for ky in 0..range_y {
                        let x = i as isize + kx as isize - center_x;
                        let y = j as isize + ky as isize - center_y;
                        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
                            continue;
                        }
                        let value = input[y as usize * width + x as usize];
                        let tap = ky * range_x + kx;
                        let temp = value * (conv_a[tap] + conv_b[tap]);
                        let mut step = 0.0f32;
                        while step < 3.2 {
                            result += temp * step;
                            step += 0.1;
                        }
                    }
                }
                *cell = result;
            }
        });
    Ok(())
}

/// Entry points declared in kernel source text (`__kernel void name(`).
pub fn declared_entries(source: &str) -> Vec<String> {
    let tokens: Vec<&str> = source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .collect();

    tokens
        .windows(3)
        .filter(|w| matches!(w[0], "__kernel" | "kernel") && w[1] == "void")
        .map(|w| w[2].to_string())
        .collect()
}

/// Compiler-style diagnostics for a source the host backend cannot accept.
pub fn check_source(source: &str) -> Result<Vec<String>, String> {
    let mut depth: i64 = 0;
    for (line_no, line) in source.lines().enumerate() {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(format!("<source>:{}: error: unmatched '}}'", line_no + 1));
            }
        }
    }
    if depth != 0 {
        return Err(format!("<source>: error: {depth} unclosed '{{' at end of input"));
    }

    let entries = declared_entries(source);
    if entries.is_empty() {
        return Err("<source>: error: no __kernel entry point declared".to_string());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(specs: Vec<(MemAccess, Vec<f32>)>) -> HostArgs {
        HostArgs::new(
            specs
                .into_iter()
                .map(|(access, data)| HostArg { access, data })
                .collect(),
        )
    }

    #[test]
    fn test_declared_entries() {
        let source = "__kernel void A(__global float* x) {}\nkernel void  B (global float* y) {}\nvoid helper() {}";
        assert_eq!(declared_entries(source), vec!["A", "B"]);
    }

    #[test]
    fn test_check_source_rejects_unbalanced() {
        assert!(check_source("__kernel void A() {").unwrap_err().contains("unclosed"));
        assert!(check_source("__kernel void A() }").unwrap_err().contains("unmatched"));
        assert!(check_source("void helper() {}").unwrap_err().contains("no __kernel"));
    }

    #[test]
    fn test_split_output_rejects_read_only() {
        let mut a = args(vec![(MemAccess::ReadOnly, vec![1.0]), (MemAccess::ReadOnly, vec![0.0])]);
        assert!(a.split_output(1).unwrap_err().contains("read-only"));
        assert!(a.split_output(5).is_err());
    }

    #[test]
    fn test_read_args_skip_output() {
        let mut a = args(vec![
            (MemAccess::ReadOnly, vec![1.0]),
            (MemAccess::ReadWrite, vec![0.0]),
            (MemAccess::ReadOnly, vec![3.0]),
        ]);
        let (reads, out) = a.split_output(1).unwrap();
        out[0] = 9.0;
        assert_eq!(reads.get(0).unwrap(), &[1.0]);
        assert_eq!(reads.get(2).unwrap(), &[3.0]);
        assert!(reads.get(1).is_err());
        assert!(reads.get(3).is_err());
    }

    #[test]
    fn test_matrix_copy() {
        let input: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let mut a = args(vec![(MemAccess::ReadOnly, input.clone()), (MemAccess::ReadWrite, vec![0.0; 12])]);
        matrix_copy(&NdRange2::new([4, 3], [2, 1]), &mut a).unwrap();
        assert_eq!(a.into_inner()[1].data, input);
    }

    #[test]
    fn test_matrix_copy_bounds() {
        let mut a = args(vec![(MemAccess::ReadOnly, vec![0.0; 4]), (MemAccess::ReadWrite, vec![0.0; 16])]);
        assert!(matrix_copy(&NdRange2::new([4, 4], [2, 2]), &mut a).is_err());
    }

    #[test]
    fn test_matrix_conv_single_tap() {
        // 1x1 taps: out = in * (a + b) * sum(0.0, 0.1, .. < 3.2)
        let mut blend = 0.0f32;
        let mut step = 0.0f32;
        while step < 3.2 {
            blend += step;
            step += 0.1;
        }
        let mut a = args(vec![
            (MemAccess::ReadOnly, vec![2.0; 4]),
            (MemAccess::ReadOnly, vec![1.0]),
            (MemAccess::ReadOnly, vec![0.5]),
            (MemAccess::ReadOnly, vec![1.0, 1.0]),
            (MemAccess::ReadWrite, vec![0.0; 4]),
        ]);
        matrix_conv(&NdRange2::new([2, 2], [2, 2]), &mut a).unwrap();
        let out = &a.into_inner()[4].data;
        for value in out {
            let expected = 3.0 * blend;
            assert!((value - expected).abs() <= expected.abs() * 1e-4, "{value} vs {expected}");
        }
    }
}
