//! Dense linear-algebra kernels over flat scalar slices.
//!
//! All kernels are shape-checked at the contract boundary: a dimension
//! mismatch is a programmer error and panics instead of coercing. Hot-path
//! variants write into caller-provided buffers and never allocate.

use crate::errors::{NanoError, NanoResult};
use crate::tensor::{Matrix, Tensor3};
use crate::Scalar;

/// Dot product of two equally sized slices.
///
/// # Panics
///
/// Panics if the slices differ in length.
pub fn dot(a: &[Scalar], b: &[Scalar]) -> Scalar {
    assert_eq!(a.len(), b.len(), "dot requires equal lengths");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm of a slice.
pub fn norm_l2(x: &[Scalar]) -> Scalar {
    dot(x, x).sqrt()
}

/// Infinity norm of a slice (zero for an empty slice).
pub fn norm_inf(x: &[Scalar]) -> Scalar {
    x.iter().fold(0.0, |m, v| m.max(v.abs()))
}

/// `y += alpha * x`.
///
/// # Panics
///
/// Panics if the slices differ in length.
pub fn axpy(alpha: Scalar, x: &[Scalar], y: &mut [Scalar]) {
    assert_eq!(x.len(), y.len(), "axpy requires equal lengths");
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// `x *= alpha`.
pub fn scale(alpha: Scalar, x: &mut [Scalar]) {
    for v in x.iter_mut() {
        *v *= alpha;
    }
}

/// Checks that every element of a slice is finite.
pub fn all_finite(x: &[Scalar]) -> bool {
    x.iter().all(|v| v.is_finite())
}

/// `C = alpha * A * B + beta * C` over row-major slices.
///
/// `a` is `m x k`, `b` is `k x n` and `c` is `m x n`.
///
/// # Panics
///
/// Panics if any slice length disagrees with the given dimensions.
pub fn gemm_nn(
    alpha: Scalar,
    a: &[Scalar],
    b: &[Scalar],
    beta: Scalar,
    c: &mut [Scalar],
    m: usize,
    k: usize,
    n: usize,
) {
    assert_eq!(a.len(), m * k, "gemm_nn: lhs size");
    assert_eq!(b.len(), k * n, "gemm_nn: rhs size");
    assert_eq!(c.len(), m * n, "gemm_nn: output size");
    for i in 0..m {
        let crow = &mut c[i * n..(i + 1) * n];
        if beta == 0.0 {
            crow.fill(0.0);
        } else if beta != 1.0 {
            scale(beta, crow);
        }
        for t in 0..k {
            let av = alpha * a[i * k + t];
            if av == 0.0 {
                continue;
            }
            let brow = &b[t * n..(t + 1) * n];
            for (cv, bv) in crow.iter_mut().zip(brow) {
                *cv += av * bv;
            }
        }
    }
}

/// `C = alpha * A^T * B + beta * C` where `a` is stored `k x m`.
pub fn gemm_tn(
    alpha: Scalar,
    a: &[Scalar],
    b: &[Scalar],
    beta: Scalar,
    c: &mut [Scalar],
    m: usize,
    k: usize,
    n: usize,
) {
    assert_eq!(a.len(), k * m, "gemm_tn: lhs size");
    assert_eq!(b.len(), k * n, "gemm_tn: rhs size");
    assert_eq!(c.len(), m * n, "gemm_tn: output size");
    if beta == 0.0 {
        c.fill(0.0);
    } else if beta != 1.0 {
        scale(beta, c);
    }
    for t in 0..k {
        let arow = &a[t * m..(t + 1) * m];
        let brow = &b[t * n..(t + 1) * n];
        for (i, av) in arow.iter().enumerate() {
            let av = alpha * av;
            if av == 0.0 {
                continue;
            }
            let crow = &mut c[i * n..(i + 1) * n];
            for (cv, bv) in crow.iter_mut().zip(brow) {
                *cv += av * bv;
            }
        }
    }
}

/// `C = alpha * A * B^T + beta * C` where `b` is stored `n x k`.
pub fn gemm_nt(
    alpha: Scalar,
    a: &[Scalar],
    b: &[Scalar],
    beta: Scalar,
    c: &mut [Scalar],
    m: usize,
    k: usize,
    n: usize,
) {
    assert_eq!(a.len(), m * k, "gemm_nt: lhs size");
    assert_eq!(b.len(), n * k, "gemm_nt: rhs size");
    assert_eq!(c.len(), m * n, "gemm_nt: output size");
    for i in 0..m {
        let arow = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let brow = &b[j * k..(j + 1) * k];
            let s = dot(arow, brow);
            let cv = &mut c[i * n + j];
            *cv = alpha * s + if beta == 0.0 { 0.0 } else { beta * *cv };
        }
    }
}

/// `y = W * x` where `w` is a row-major `rows x cols` slice.
pub fn matvec(w: &[Scalar], rows: usize, cols: usize, x: &[Scalar], y: &mut [Scalar]) {
    assert_eq!(w.len(), rows * cols, "matvec: matrix size");
    assert_eq!(x.len(), cols, "matvec: input size");
    assert_eq!(y.len(), rows, "matvec: output size");
    for (i, yi) in y.iter_mut().enumerate() {
        *yi = dot(&w[i * cols..(i + 1) * cols], x);
    }
}

/// `y = W^T * g` where `w` is a row-major `rows x cols` slice.
pub fn matvec_t(w: &[Scalar], rows: usize, cols: usize, g: &[Scalar], y: &mut [Scalar]) {
    assert_eq!(w.len(), rows * cols, "matvec_t: matrix size");
    assert_eq!(g.len(), rows, "matvec_t: input size");
    assert_eq!(y.len(), cols, "matvec_t: output size");
    y.fill(0.0);
    for (i, gv) in g.iter().enumerate() {
        if *gv == 0.0 {
            continue;
        }
        axpy(*gv, &w[i * cols..(i + 1) * cols], y);
    }
}

/// Rank-one update `W += g * x^T` into a row-major `g.len() x x.len()` slice.
pub fn ger(w: &mut [Scalar], g: &[Scalar], x: &[Scalar]) {
    assert_eq!(w.len(), g.len() * x.len(), "ger: matrix size");
    let cols = x.len();
    for (i, gv) in g.iter().enumerate() {
        axpy(*gv, x, &mut w[i * cols..(i + 1) * cols]);
    }
}

/// Elementwise addition of two matrices.
///
/// # Errors
///
/// Returns `NanoError::DimensionMismatch` if the shapes differ.
pub fn add(a: &Matrix, b: &Matrix) -> NanoResult<Matrix> {
    if a.shape() != b.shape() {
        return Err(NanoError::DimensionMismatch(
            "matrices must have the same shape for elementwise add".into(),
        ));
    }
    let data = a.data.iter().zip(&b.data).map(|(x, y)| x + y).collect();
    Ok(Matrix::from_data(data, a.rows, a.cols))
}

/// Elementwise multiplication of two matrices.
///
/// # Errors
///
/// Returns `NanoError::DimensionMismatch` if the shapes differ.
pub fn mul_elementwise(a: &Matrix, b: &Matrix) -> NanoResult<Matrix> {
    if a.shape() != b.shape() {
        return Err(NanoError::DimensionMismatch(
            "matrices must have the same shape for elementwise mul".into(),
        ));
    }
    let data = a.data.iter().zip(&b.data).map(|(x, y)| x * y).collect();
    Ok(Matrix::from_data(data, a.rows, a.cols))
}

/// Matrix multiplication `C = A * B` allocating the result.
///
/// # Errors
///
/// Returns `NanoError::DimensionMismatch` if `a.cols != b.rows`.
pub fn matmul(a: &Matrix, b: &Matrix) -> NanoResult<Matrix> {
    if a.cols != b.rows {
        return Err(NanoError::DimensionMismatch(format!(
            "matmul: {}x{} times {}x{}",
            a.rows, a.cols, b.rows, b.cols
        )));
    }
    let mut out = Matrix::new(a.rows, b.cols);
    gemm_nn(
        1.0,
        a.as_slice(),
        b.as_slice(),
        0.0,
        out.as_mut_slice(),
        a.rows,
        a.cols,
        b.cols,
    );
    Ok(out)
}

/// Size of the convolution output along one axis: `(input - kernel) / delta + 1`.
///
/// # Errors
///
/// Returns `NanoError::DimensionMismatch` if the kernel does not fit the
/// input or the stride is zero.
pub fn conv_dim(input: usize, kernel: usize, delta: usize) -> NanoResult<usize> {
    if delta == 0 || kernel == 0 || kernel > input {
        return Err(NanoError::DimensionMismatch(format!(
            "convolution: kernel {kernel} with stride {delta} over input {input}"
        )));
    }
    Ok((input - kernel) / delta + 1)
}

/// Lowers a rank-3 input into the im2col matrix used to express convolution
/// as one matrix product.
///
/// The output matrix has shape `(planes * krows * kcols, orows * ocols)`;
/// column `r * ocols + c` holds the input patch that produces output pixel
/// `(r, c)`. No padding: patches are fully inside the input.
///
/// # Panics
///
/// Panics if `out` was not sized for the given kernel and strides.
pub fn im2col(
    input: &Tensor3,
    krows: usize,
    kcols: usize,
    drow: usize,
    dcol: usize,
    out: &mut Matrix,
) {
    let orows = (input.rows - krows) / drow + 1;
    let ocols = (input.cols - kcols) / dcol + 1;
    assert_eq!(out.rows, input.planes * krows * kcols, "im2col: row count");
    assert_eq!(out.cols, orows * ocols, "im2col: column count");

    let ocount = orows * ocols;
    for p in 0..input.planes {
        let plane = input.plane(p);
        for kr in 0..krows {
            for kc in 0..kcols {
                let orow = &mut out.data
                    [(p * krows * kcols + kr * kcols + kc) * ocount..][..ocount];
                for r in 0..orows {
                    let irow = &plane[(r * drow + kr) * input.cols..];
                    for c in 0..ocols {
                        orow[r * ocols + c] = irow[c * dcol + kc];
                    }
                }
            }
        }
    }
}

/// The transpose gather of [`im2col`]: accumulates a patch matrix back into
/// the input layout. Used to assemble the convolution input-gradient.
///
/// The destination is zeroed first; overlapping patches accumulate.
///
/// # Panics
///
/// Panics if `columns` was not sized for the given kernel and strides.
pub fn col2im(
    columns: &Matrix,
    krows: usize,
    kcols: usize,
    drow: usize,
    dcol: usize,
    out: &mut Tensor3,
) {
    let orows = (out.rows - krows) / drow + 1;
    let ocols = (out.cols - kcols) / dcol + 1;
    assert_eq!(columns.rows, out.planes * krows * kcols, "col2im: row count");
    assert_eq!(columns.cols, orows * ocols, "col2im: column count");

    out.zero();
    let ocount = orows * ocols;
    let out_cols = out.cols;
    for p in 0..out.planes {
        let plane = out.plane_mut(p);
        for kr in 0..krows {
            for kc in 0..kcols {
                let crow =
                    &columns.data[(p * krows * kcols + kr * kcols + kc) * ocount..][..ocount];
                for r in 0..orows {
                    let irow = &mut plane[(r * drow + kr) * out_cols..];
                    for c in 0..ocols {
                        irow[c * dcol + kc] += crow[r * ocols + c];
                    }
                }
            }
        }
    }
}
