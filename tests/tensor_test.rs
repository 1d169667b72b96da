use nanolearn::ops;
use nanolearn::tensor::{Matrix, Tensor3};

#[test]
fn matrix_create_and_access() {
    let mut m = Matrix::new(2, 3);
    assert_eq!(m.shape(), (2, 3));
    assert!(m.data.iter().all(|&v| v == 0.0));
    m.set(1, 2, 5.0);
    assert_eq!(m.get(1, 2), 5.0);
    assert_eq!(m.row(1), &[0.0, 0.0, 5.0]);
}

#[test]
fn matmul_basic() {
    let a = Matrix::from_data(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
    let b = Matrix::from_data(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
    let c = ops::matmul(&a, &b).expect("matmul failed");
    assert_eq!(c.shape(), (2, 2));
    assert_eq!(c.get(0, 0), 19.0);
    assert_eq!(c.get(0, 1), 22.0);
    assert_eq!(c.get(1, 0), 43.0);
    assert_eq!(c.get(1, 1), 50.0);
}

#[test]
fn matmul_rejects_mismatched_shapes() {
    let a = Matrix::new(2, 3);
    let b = Matrix::new(2, 3);
    assert!(ops::matmul(&a, &b).is_err());
}

#[test]
fn gemm_fused_update() {
    // C <- alpha * A * B + beta * C
    let a = [1.0, 0.0, 0.0, 1.0];
    let b = [2.0, 3.0, 4.0, 5.0];
    let mut c = [1.0, 1.0, 1.0, 1.0];
    ops::gemm_nn(2.0, &a, &b, 0.5, &mut c, 2, 2, 2);
    assert_eq!(c, [4.5, 6.5, 8.5, 10.5]);
}

#[test]
fn matvec_and_transpose() {
    let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2 x 3
    let x = [1.0, 1.0, 1.0];
    let mut y = [0.0; 2];
    ops::matvec(&w, 2, 3, &x, &mut y);
    assert_eq!(y, [6.0, 15.0]);

    let g = [1.0, 1.0];
    let mut z = [0.0; 3];
    ops::matvec_t(&w, 2, 3, &g, &mut z);
    assert_eq!(z, [5.0, 7.0, 9.0]);
}

#[test]
fn tensor_reshape_preserves_count() {
    let mut t = Tensor3::new(2, 3, 4);
    assert_eq!(t.size(), 24);
    t.reshape(4, 3, 2);
    assert_eq!(t.dims(), (4, 3, 2));
    assert_eq!(t.size(), 24);
}

#[test]
#[should_panic]
fn tensor_reshape_rejects_bad_count() {
    let mut t = Tensor3::new(2, 3, 4);
    t.reshape(5, 1, 1);
}

#[test]
fn tensor_plane_views() {
    let t = Tensor3::from_data((0..12).map(|v| v as f64).collect(), 3, 2, 2);
    assert_eq!(t.plane(0), &[0.0, 1.0, 2.0, 3.0]);
    assert_eq!(t.plane(2), &[8.0, 9.0, 10.0, 11.0]);
    assert_eq!(t.get(1, 1, 0), 6.0);
}

#[test]
fn conv_dim_no_padding() {
    assert_eq!(ops::conv_dim(5, 3, 1).unwrap(), 3);
    assert_eq!(ops::conv_dim(5, 3, 2).unwrap(), 2);
    assert_eq!(ops::conv_dim(7, 2, 3).unwrap(), 2);
    assert!(ops::conv_dim(3, 5, 1).is_err());
    assert!(ops::conv_dim(5, 3, 0).is_err());
}

#[test]
fn im2col_layout() {
    // one 3x3 plane, 2x2 kernel, stride 1 -> 4 columns of 4 patch entries
    let input = Tensor3::from_data((1..=9).map(|v| v as f64).collect(), 1, 3, 3);
    let mut cols = Matrix::new(4, 4);
    ops::im2col(&input, 2, 2, 1, 1, &mut cols);

    // column r * ocols + c holds the patch producing output pixel (r, c)
    let patch = |c: usize| -> Vec<f64> { (0..4).map(|r| cols.get(r, c)).collect() };
    assert_eq!(patch(0), vec![1.0, 2.0, 4.0, 5.0]);
    assert_eq!(patch(1), vec![2.0, 3.0, 5.0, 6.0]);
    assert_eq!(patch(2), vec![4.0, 5.0, 7.0, 8.0]);
    assert_eq!(patch(3), vec![5.0, 6.0, 8.0, 9.0]);
}

#[test]
fn col2im_is_transpose_gather() {
    // <im2col(x), M> == <x, col2im(M)> for arbitrary M
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    let mut rng = StdRng::seed_from_u64(3);
    let mut input = Tensor3::new(2, 5, 4);
    input.fill_uniform(&mut rng, -1.0, 1.0);

    let (krows, kcols, drow, dcol) = (3, 2, 2, 1);
    let orows = ops::conv_dim(5, krows, drow).unwrap();
    let ocols = ops::conv_dim(4, kcols, dcol).unwrap();
    let mut cols = Matrix::new(2 * krows * kcols, orows * ocols);
    ops::im2col(&input, krows, kcols, drow, dcol, &mut cols);

    let mut m = Matrix::new(cols.rows, cols.cols);
    for v in m.as_mut_slice().iter_mut() {
        use rand::Rng;
        *v = rng.random_range(-1.0..1.0);
    }
    let mut back = Tensor3::new(2, 5, 4);
    ops::col2im(&m, krows, kcols, drow, dcol, &mut back);

    let lhs = ops::dot(cols.as_slice(), m.as_slice());
    let rhs = ops::dot(input.as_slice(), back.as_slice());
    approx::assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
}
