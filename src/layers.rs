//! The palette of differentiable layers composed by a model.
//!
//! Layers are a closed sum dispatched statically through the [`Layer`] enum.
//! A layer never owns parameters: the model hands it read or write views
//! into the flat parameter vector, addressed by offset ranges. Buffers are
//! allocated once per `configure` call and reused on the hot path.

use crate::activations::ActKind;
use crate::errors::{NanoError, NanoResult};
use crate::ops;
use crate::random;
use crate::tensor::{size3, Dims3, Matrix, Tensor3};
use crate::Scalar;
use rand::rngs::StdRng;

/// Variance guard for the normalization statistics.
const NORM_EPSILON: Scalar = 1e-12;

/// A differentiable transformation with static input/output dimensions.
///
/// Every variant exposes the same three operations:
/// - `output`: forward evaluation, deterministic in `(params, input)`;
/// - `ginput`: gradient with respect to the input, given the gradient with
///   respect to the output;
/// - `gparam`: gradient with respect to the layer's parameter slice,
///   accumulated into a zero-initialized view of the flat gradient vector.
#[derive(Clone, Debug)]
pub enum Layer {
    Affine(AffineLayer),
    Conv(ConvLayer),
    Norm(NormLayer),
    Activation(ActLayer),
}

impl Layer {
    /// Fully-connected layer mapping the flattened input to `outputs` scalars.
    pub fn affine(outputs: usize) -> Layer {
        Layer::Affine(AffineLayer {
            idims: (0, 0, 0),
            odims: (outputs, 1, 1),
        })
    }

    /// Convolution layer with `omaps` output planes, a `krows x kcols`
    /// kernel, strides `(drow, dcol)` and plane connectivity `kconn`.
    pub fn conv(
        omaps: usize,
        krows: usize,
        kcols: usize,
        drow: usize,
        dcol: usize,
        kconn: usize,
    ) -> Layer {
        Layer::Conv(ConvLayer {
            omaps,
            krows,
            kcols,
            drow,
            dcol,
            kconn,
            idims: (0, 0, 0),
            odims: (0, 0, 0),
            kmat: Matrix::new(0, 0),
            colbuf: Matrix::new(0, 0),
            gcol: Matrix::new(0, 0),
            gkmat: Matrix::new(0, 0),
        })
    }

    /// Per-sample normalization with learnable per-plane scale and shift.
    pub fn norm() -> Layer {
        Layer::Norm(NormLayer {
            dims: (0, 0, 0),
            xhat: Tensor3::new(0, 0, 0),
            istd: 0.0,
        })
    }

    /// Elementwise activation layer.
    pub fn activation(kind: ActKind) -> Layer {
        Layer::Activation(ActLayer { kind, dims: (0, 0, 0) })
    }

    /// Stable identifier used in logs and the serialized model format.
    pub fn name(&self) -> String {
        match self {
            Layer::Affine(l) => format!("affine:{}", l.odims.0),
            Layer::Conv(l) => format!(
                "conv:{}x{}x{}/{}x{}/{}",
                l.omaps, l.krows, l.kcols, l.drow, l.dcol, l.kconn
            ),
            Layer::Norm(_) => "norm".to_string(),
            Layer::Activation(l) => l.kind.name().to_string(),
        }
    }

    /// Validates the input dimensions, sizes internal buffers and returns
    /// the output dimensions.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::DimensionMismatch` if the layer cannot accept
    /// inputs of the given shape.
    pub fn configure(&mut self, idims: Dims3) -> NanoResult<Dims3> {
        if size3(idims) == 0 {
            return Err(NanoError::DimensionMismatch(format!(
                "{}: empty input {idims:?}",
                self.name()
            )));
        }
        match self {
            Layer::Affine(l) => l.configure(idims),
            Layer::Conv(l) => l.configure(idims),
            Layer::Norm(l) => l.configure(idims),
            Layer::Activation(l) => l.configure(idims),
        }
    }

    /// Declared input dimensions (valid after `configure`).
    pub fn idims(&self) -> Dims3 {
        match self {
            Layer::Affine(l) => l.idims,
            Layer::Conv(l) => l.idims,
            Layer::Norm(l) => l.dims,
            Layer::Activation(l) => l.dims,
        }
    }

    /// Declared output dimensions (valid after `configure`).
    pub fn odims(&self) -> Dims3 {
        match self {
            Layer::Affine(l) => l.odims,
            Layer::Conv(l) => l.odims,
            Layer::Norm(l) => l.dims,
            Layer::Activation(l) => l.dims,
        }
    }

    /// Number of parameters owned by this layer.
    pub fn psize(&self) -> usize {
        match self {
            Layer::Affine(l) => l.psize(),
            Layer::Conv(l) => l.psize(),
            Layer::Norm(l) => l.psize(),
            Layer::Activation(_) => 0,
        }
    }

    /// Initializes the parameter slice with fan-in-normalized random values.
    ///
    /// # Panics
    ///
    /// Panics if `params.len() != self.psize()`.
    pub fn init_params(&self, params: &mut [Scalar], rng: &mut StdRng) {
        assert_eq!(params.len(), self.psize(), "{}: parameter slice", self.name());
        match self {
            Layer::Affine(l) => {
                let bound = 1.0 / (size3(l.idims) as Scalar).sqrt();
                random::fill_uniform(rng, params, -bound, bound);
            }
            Layer::Conv(l) => {
                let fan_in = (l.idims.0 / l.kconn) * l.krows * l.kcols;
                let bound = 1.0 / (fan_in as Scalar).sqrt();
                random::fill_uniform(rng, params, -bound, bound);
            }
            Layer::Norm(l) => {
                let planes = l.dims.0;
                params[..planes].fill(1.0);
                params[planes..].fill(0.0);
            }
            Layer::Activation(_) => {}
        }
    }

    /// Forward evaluation.
    ///
    /// # Panics
    ///
    /// Panics if the tensor or slice shapes disagree with the configured
    /// dimensions.
    pub fn output(&mut self, params: &[Scalar], input: &Tensor3, output: &mut Tensor3) {
        assert_eq!(input.dims(), self.idims(), "{}: input dims", self.name());
        assert_eq!(output.dims(), self.odims(), "{}: output dims", self.name());
        assert_eq!(params.len(), self.psize(), "{}: parameter slice", self.name());
        match self {
            Layer::Affine(l) => l.output(params, input, output),
            Layer::Conv(l) => l.output(params, input, output),
            Layer::Norm(l) => l.output(params, input, output),
            Layer::Activation(l) => l.output(input, output),
        }
    }

    /// Gradient with respect to the input, using the caches written by the
    /// last `output` call on the same input.
    pub fn ginput(&mut self, params: &[Scalar], input: &Tensor3, g_out: &Tensor3, g_in: &mut Tensor3) {
        assert_eq!(g_out.dims(), self.odims(), "{}: output-gradient dims", self.name());
        assert_eq!(g_in.dims(), self.idims(), "{}: input-gradient dims", self.name());
        match self {
            Layer::Affine(l) => l.ginput(params, g_out, g_in),
            Layer::Conv(l) => l.ginput(g_out, g_in),
            Layer::Norm(l) => l.ginput(params, g_out, g_in),
            Layer::Activation(l) => l.ginput(input, g_out, g_in),
        }
    }

    /// Gradient with respect to the parameters, accumulated into `pgrad`
    /// (a zero-initialized view into the flat gradient vector).
    pub fn gparam(&mut self, pgrad: &mut [Scalar], input: &Tensor3, g_out: &Tensor3) {
        assert_eq!(pgrad.len(), self.psize(), "{}: gradient slice", self.name());
        match self {
            Layer::Affine(l) => l.gparam(pgrad, input, g_out),
            Layer::Conv(l) => l.gparam(pgrad, g_out),
            Layer::Norm(l) => l.gparam(pgrad, g_out),
            Layer::Activation(_) => {}
        }
    }
}

/// Fully-connected affine transform `out = W * in + b` over flattened views.
#[derive(Clone, Debug)]
pub struct AffineLayer {
    idims: Dims3,
    odims: Dims3,
}

impl AffineLayer {
    fn isize(&self) -> usize {
        size3(self.idims)
    }

    fn osize(&self) -> usize {
        size3(self.odims)
    }

    fn psize(&self) -> usize {
        self.osize() * self.isize() + self.osize()
    }

    fn configure(&mut self, idims: Dims3) -> NanoResult<Dims3> {
        self.idims = idims;
        Ok(self.odims)
    }

    fn output(&self, params: &[Scalar], input: &Tensor3, output: &mut Tensor3) {
        let (osize, isize) = (self.osize(), self.isize());
        let (w, b) = params.split_at(osize * isize);
        ops::matvec(w, osize, isize, input.as_slice(), output.as_mut_slice());
        ops::axpy(1.0, b, output.as_mut_slice());
    }

    fn ginput(&self, params: &[Scalar], g_out: &Tensor3, g_in: &mut Tensor3) {
        let (osize, isize) = (self.osize(), self.isize());
        let w = &params[..osize * isize];
        ops::matvec_t(w, osize, isize, g_out.as_slice(), g_in.as_mut_slice());
    }

    fn gparam(&self, pgrad: &mut [Scalar], input: &Tensor3, g_out: &Tensor3) {
        let (osize, isize) = (self.osize(), self.isize());
        let (gw, gb) = pgrad.split_at_mut(osize * isize);
        ops::ger(gw, g_out.as_slice(), input.as_slice());
        ops::axpy(1.0, g_out.as_slice(), gb);
    }
}

/// Convolution over 3D tensors, lowered to one matrix product per sample.
///
/// The kernel tensor has shape `omaps x (imaps / kconn) x krows x kcols`;
/// output plane `o` is convolved only with the input planes congruent to
/// `o` modulo `kconn`. The lowering expands the kernel into an
/// `omaps x (imaps * krows * kcols)` matrix with zeros in non-connected
/// slots, and rewrites the input with [`ops::im2col`].
#[derive(Clone, Debug)]
pub struct ConvLayer {
    omaps: usize,
    krows: usize,
    kcols: usize,
    drow: usize,
    dcol: usize,
    kconn: usize,
    idims: Dims3,
    odims: Dims3,
    /// Expanded kernel matrix, rebuilt from the parameter slice per forward.
    kmat: Matrix,
    /// im2col lowering of the last forward input, reused by `gparam`.
    colbuf: Matrix,
    gcol: Matrix,
    gkmat: Matrix,
}

impl ConvLayer {
    fn imaps(&self) -> usize {
        self.idims.0
    }

    /// Connected input planes per output plane.
    fn ikmaps(&self) -> usize {
        self.idims.0 / self.kconn
    }

    fn ksize(&self) -> usize {
        self.krows * self.kcols
    }

    fn osize2(&self) -> usize {
        self.odims.1 * self.odims.2
    }

    fn psize(&self) -> usize {
        self.omaps * self.ikmaps() * self.ksize() + self.omaps
    }

    fn configure(&mut self, idims: Dims3) -> NanoResult<Dims3> {
        let (imaps, irows, icols) = idims;
        if self.kconn == 0 || imaps % self.kconn != 0 {
            return Err(NanoError::DimensionMismatch(format!(
                "conv: {imaps} input planes are not a multiple of connectivity {}",
                self.kconn
            )));
        }
        let orows = ops::conv_dim(irows, self.krows, self.drow)?;
        let ocols = ops::conv_dim(icols, self.kcols, self.dcol)?;
        self.idims = idims;
        self.odims = (self.omaps, orows, ocols);

        let cols = imaps * self.ksize();
        self.kmat = Matrix::new(self.omaps, cols);
        self.colbuf = Matrix::new(cols, orows * ocols);
        self.gcol = Matrix::new(cols, orows * ocols);
        self.gkmat = Matrix::new(self.omaps, cols);
        Ok(self.odims)
    }

    /// Scatters the kernel parameters into the zero-filled expanded matrix.
    fn expand_kernel(&mut self, kparams: &[Scalar]) {
        let (kk, ikmaps) = (self.ksize(), self.ikmaps());
        self.kmat.zero();
        for o in 0..self.omaps {
            let krow = self.kmat.row_mut(o);
            let mut i = o % self.kconn;
            let mut ik = 0;
            while i < self.idims.0 {
                krow[i * kk..(i + 1) * kk]
                    .copy_from_slice(&kparams[(o * ikmaps + ik) * kk..][..kk]);
                i += self.kconn;
                ik += 1;
            }
        }
    }

    fn output(&mut self, params: &[Scalar], input: &Tensor3, output: &mut Tensor3) {
        let ksize = self.omaps * self.ikmaps() * self.ksize();
        let (kparams, bias) = params.split_at(ksize);
        self.expand_kernel(kparams);
        ops::im2col(input, self.krows, self.kcols, self.drow, self.dcol, &mut self.colbuf);
        ops::gemm_nn(
            1.0,
            self.kmat.as_slice(),
            self.colbuf.as_slice(),
            0.0,
            output.as_mut_slice(),
            self.omaps,
            self.imaps() * self.ksize(),
            self.osize2(),
        );
        for o in 0..self.omaps {
            let b = bias[o];
            for v in output.plane_mut(o) {
                *v += b;
            }
        }
    }

    fn ginput(&mut self, g_out: &Tensor3, g_in: &mut Tensor3) {
        let (m, k, n) = (self.imaps() * self.ksize(), self.omaps, self.osize2());
        // kmat still holds the expansion from the matching forward pass
        ops::gemm_tn(
            1.0,
            self.kmat.as_slice(),
            g_out.as_slice(),
            0.0,
            self.gcol.as_mut_slice(),
            m,
            k,
            n,
        );
        ops::col2im(&self.gcol, self.krows, self.kcols, self.drow, self.dcol, g_in);
    }

    fn gparam(&mut self, pgrad: &mut [Scalar], g_out: &Tensor3) {
        let (kk, ikmaps) = (self.ksize(), self.ikmaps());
        let (m, k, n) = (self.omaps, self.osize2(), self.imaps() * kk);
        ops::gemm_nt(
            1.0,
            g_out.as_slice(),
            self.colbuf.as_slice(),
            0.0,
            self.gkmat.as_mut_slice(),
            m,
            k,
            n,
        );
        let (kgrad, bgrad) = pgrad.split_at_mut(self.omaps * ikmaps * kk);
        for o in 0..self.omaps {
            let grow = self.gkmat.row(o);
            let mut i = o % self.kconn;
            let mut ik = 0;
            while i < self.idims.0 {
                ops::axpy(
                    1.0,
                    &grow[i * kk..(i + 1) * kk],
                    &mut kgrad[(o * ikmaps + ik) * kk..][..kk],
                );
                i += self.kconn;
                ik += 1;
            }
            bgrad[o] += g_out.plane(o).iter().sum::<Scalar>();
        }
    }
}

/// Zero-mean, unit-variance normalization over the whole input of one
/// sample, followed by a learnable per-plane scale and shift.
///
/// Statistics are computed per sample; there are no running batch
/// statistics, and the gradient flows through the mean and variance.
#[derive(Clone, Debug)]
pub struct NormLayer {
    dims: Dims3,
    /// Normalized input from the last forward, reused by both gradients.
    xhat: Tensor3,
    istd: Scalar,
}

impl NormLayer {
    fn psize(&self) -> usize {
        2 * self.dims.0
    }

    fn configure(&mut self, idims: Dims3) -> NanoResult<Dims3> {
        self.dims = idims;
        self.xhat = Tensor3::from_dims(idims);
        Ok(idims)
    }

    fn output(&mut self, params: &[Scalar], input: &Tensor3, output: &mut Tensor3) {
        let n = input.size() as Scalar;
        let (gamma, beta) = params.split_at(self.dims.0);

        let mean = input.as_slice().iter().sum::<Scalar>() / n;
        let var = input
            .as_slice()
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<Scalar>()
            / n;
        self.istd = 1.0 / (var + NORM_EPSILON).sqrt();

        for (xh, x) in self.xhat.as_mut_slice().iter_mut().zip(input.as_slice()) {
            *xh = (x - mean) * self.istd;
        }
        for p in 0..self.dims.0 {
            let (g, b) = (gamma[p], beta[p]);
            for (o, xh) in output.plane_mut(p).iter_mut().zip(self.xhat.plane(p)) {
                *o = g * xh + b;
            }
        }
    }

    fn ginput(&mut self, params: &[Scalar], g_out: &Tensor3, g_in: &mut Tensor3) {
        let n = self.xhat.size() as Scalar;
        let gamma = &params[..self.dims.0];

        // dxhat = g_out * gamma, staged in g_in
        for p in 0..self.dims.0 {
            let g = gamma[p];
            for (d, go) in g_in.plane_mut(p).iter_mut().zip(g_out.plane(p)) {
                *d = g * go;
            }
        }
        let m1 = g_in.as_slice().iter().sum::<Scalar>() / n;
        let m2 = ops::dot(g_in.as_slice(), self.xhat.as_slice()) / n;
        for (d, xh) in g_in.as_mut_slice().iter_mut().zip(self.xhat.as_slice()) {
            *d = self.istd * (*d - m1 - xh * m2);
        }
    }

    fn gparam(&mut self, pgrad: &mut [Scalar], g_out: &Tensor3) {
        let (dgamma, dbeta) = pgrad.split_at_mut(self.dims.0);
        for p in 0..self.dims.0 {
            dgamma[p] += ops::dot(g_out.plane(p), self.xhat.plane(p));
            dbeta[p] += g_out.plane(p).iter().sum::<Scalar>();
        }
    }
}

/// Elementwise, parameterless activation layer.
#[derive(Clone, Debug)]
pub struct ActLayer {
    kind: ActKind,
    dims: Dims3,
}

impl ActLayer {
    fn configure(&mut self, idims: Dims3) -> NanoResult<Dims3> {
        self.dims = idims;
        Ok(idims)
    }

    fn output(&self, input: &Tensor3, output: &mut Tensor3) {
        for (o, x) in output.as_mut_slice().iter_mut().zip(input.as_slice()) {
            *o = self.kind.eval(*x);
        }
    }

    fn ginput(&self, input: &Tensor3, g_out: &Tensor3, g_in: &mut Tensor3) {
        for ((gi, go), x) in g_in
            .as_mut_slice()
            .iter_mut()
            .zip(g_out.as_slice())
            .zip(input.as_slice())
        {
            *gi = go * self.kind.deriv(*x);
        }
    }
}
