//! The feed-forward model: an ordered chain of layers over one flat
//! parameter vector, with reverse-mode gradients and bit-exact
//! serialization.

use crate::errors::{NanoError, NanoResult};
use crate::layers::Layer;
use crate::tensor::{size3, Dims3, Tensor3};
use crate::Scalar;
use rand::rngs::StdRng;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"NANOMDL\0";
const VERSION: u32 = 1;
const SCALAR_BYTES: usize = size_of::<Scalar>();

/// Fletcher-64 checksum over a byte stream, folded as little-endian 32-bit
/// words (the tail word is zero-padded).
fn fletcher64(bytes: &[u8]) -> u64 {
    const MOD: u64 = 0xffff_ffff;
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum1 = (sum1 + u64::from(u32::from_le_bytes(word))) % MOD;
        sum2 = (sum2 + sum1) % MOD;
    }
    (sum2 << 32) | sum1
}

fn scalar_from_le(bytes: &[u8]) -> Scalar {
    let mut buf = [0u8; SCALAR_BYTES];
    buf.copy_from_slice(bytes);
    Scalar::from_le_bytes(buf)
}

/// A sequential feed-forward model of rank-3 tensor transformations.
///
/// The model owns the flat parameter vector; each layer receives read or
/// write views into it addressed by an offset table. Intermediate
/// activations for one forward/backward pass are preallocated at `resize`
/// time, so the training loop does not allocate.
///
/// A model is not thread-safe: concurrent evaluators each hold their own
/// clone (see `Accumulator`).
#[derive(Clone, Debug)]
pub struct Model {
    layers: Vec<Layer>,
    /// Parameter offset per layer; `offsets[i]..offsets[i + 1]` is layer i.
    offsets: Vec<usize>,
    params: Vec<Scalar>,
    pgrad: Vec<Scalar>,
    /// Activation buffers: `bufs[0]` is the input, `bufs[i + 1]` the output
    /// of layer `i`.
    bufs: Vec<Tensor3>,
    gbufs: Vec<Tensor3>,
    idims: Dims3,
    odims: Dims3,
    configured: bool,
}

impl Model {
    /// Creates an unconfigured model from an ordered list of layers.
    ///
    /// Call [`Model::resize`] before any evaluation.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            offsets: Vec::new(),
            params: Vec::new(),
            pgrad: Vec::new(),
            bufs: Vec::new(),
            gbufs: Vec::new(),
            idims: (0, 0, 0),
            odims: (0, 0, 0),
            configured: false,
        }
    }

    /// Validates the layer chain against the given input/output dimensions,
    /// computes parameter offsets and allocates all evaluation buffers.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::DimensionMismatch` if a layer rejects its input
    /// shape or the final layer's output does not equal `odims`.
    pub fn resize(&mut self, idims: Dims3, odims: Dims3) -> NanoResult<()> {
        let mut dims = idims;
        let mut offsets = Vec::with_capacity(self.layers.len() + 1);
        let mut bufs = Vec::with_capacity(self.layers.len() + 1);

        offsets.push(0);
        bufs.push(Tensor3::from_dims(dims));
        for layer in self.layers.iter_mut() {
            dims = layer.configure(dims)?;
            offsets.push(offsets.last().unwrap() + layer.psize());
            bufs.push(Tensor3::from_dims(dims));
        }
        if dims != odims {
            return Err(NanoError::DimensionMismatch(format!(
                "model: final layer produces {dims:?}, expected {odims:?}"
            )));
        }

        let psize = *offsets.last().unwrap();
        self.gbufs = bufs.clone();
        self.bufs = bufs;
        self.offsets = offsets;
        self.params = vec![0.0; psize];
        self.pgrad = vec![0.0; psize];
        self.idims = idims;
        self.odims = odims;
        self.configured = true;
        Ok(())
    }

    /// Input dimensions (valid after `resize`).
    pub fn idims(&self) -> Dims3 {
        self.idims
    }

    /// Output dimensions (valid after `resize`).
    pub fn odims(&self) -> Dims3 {
        self.odims
    }

    /// Total number of trainable parameters.
    pub fn psize(&self) -> usize {
        self.params.len()
    }

    /// The composed layers.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Overwrites the flat parameter vector (bitwise copy).
    ///
    /// # Panics
    ///
    /// Panics if `x.len() != self.psize()`.
    pub fn set_params(&mut self, x: &[Scalar]) {
        assert_eq!(x.len(), self.params.len(), "model: parameter count");
        self.params.copy_from_slice(x);
    }

    /// Borrows the flat parameter vector.
    pub fn get_params(&self) -> &[Scalar] {
        &self.params
    }

    /// Sets all parameters to zero.
    pub fn zero_params(&mut self) {
        self.params.fill(0.0);
    }

    /// Draws fresh parameters, each layer scaled by the inverse square root
    /// of its fan-in.
    pub fn random_params(&mut self, rng: &mut StdRng) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.init_params(&mut self.params[self.offsets[i]..self.offsets[i + 1]], rng);
        }
    }

    /// Forward evaluation through all layers, caching activations for the
    /// next backward pass. Returns the output of the final layer.
    ///
    /// # Panics
    ///
    /// Panics if the model is unconfigured or `input` has the wrong shape.
    pub fn output(&mut self, input: &Tensor3) -> &Tensor3 {
        assert!(self.configured, "model: resize before evaluation");
        assert_eq!(input.dims(), self.idims, "model: input dims");
        self.bufs[0].copy_from(input);
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let params = &self.params[self.offsets[i]..self.offsets[i + 1]];
            let (head, tail) = self.bufs.split_at_mut(i + 1);
            layer.output(params, &head[i], &mut tail[0]);
        }
        self.bufs.last().unwrap()
    }

    /// Reverse scan through the chain from an output gradient.
    ///
    /// At each layer the parameter-gradient slice is written first, then the
    /// input gradient is propagated. Returns the gradient with respect to
    /// the model input and the flat parameter gradient; both borrow buffers
    /// overwritten by the next call.
    ///
    /// Valid only directly after [`Model::output`], whose cached activations
    /// it consumes.
    pub fn grad(&mut self, g_out: &Tensor3) -> (&Tensor3, &[Scalar]) {
        assert!(self.configured, "model: resize before evaluation");
        assert_eq!(g_out.dims(), self.odims, "model: output-gradient dims");
        self.pgrad.fill(0.0);
        self.gbufs.last_mut().unwrap().copy_from(g_out);
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            let params = &self.params[self.offsets[i]..self.offsets[i + 1]];
            let pgrad = &mut self.pgrad[self.offsets[i]..self.offsets[i + 1]];
            let (head, tail) = self.gbufs.split_at_mut(i + 1);
            layer.gparam(pgrad, &self.bufs[i], &tail[0]);
            layer.ginput(params, &self.bufs[i], &tail[0], &mut head[i]);
        }
        (&self.gbufs[0], &self.pgrad)
    }

    /// Serializes the architecture names and parameters to a writer.
    ///
    /// Format: magic `"NANOMDL\0"`, version `u32` LE, layer count `u32` LE,
    /// then per layer the name (`u16` length + bytes), the parameter count
    /// (`u64` LE) and the parameters as little-endian IEEE 754, terminated
    /// by a Fletcher-64 checksum over all preceding bytes.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::Io` if the writer fails.
    pub fn write_to<W: Write>(&self, w: &mut W) -> NanoResult<()> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.layers.len() as u32).to_le_bytes());
        for (i, layer) in self.layers.iter().enumerate() {
            let name = layer.name();
            bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(&(layer.psize() as u64).to_le_bytes());
            for v in &self.params[self.offsets[i]..self.offsets[i + 1]] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        let checksum = fletcher64(&bytes);
        w.write_all(&bytes)?;
        w.write_all(&checksum.to_le_bytes())?;
        Ok(())
    }

    /// Loads parameters from a reader, verifying magic, version, layer
    /// names, parameter counts and the checksum before installing anything.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::SerializationError` on any mismatch; the current
    /// parameters are kept untouched in that case.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> NanoResult<()> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        if bytes.len() < 8 {
            return Err(NanoError::SerializationError("truncated model file".into()));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 8);
        let stored = u64::from_le_bytes(tail.try_into().unwrap());
        if fletcher64(body) != stored {
            return Err(NanoError::SerializationError("checksum mismatch".into()));
        }

        let mut cursor = Cursor { body, pos: 0 };
        if cursor.take(8)? != MAGIC {
            return Err(NanoError::SerializationError("bad magic".into()));
        }
        let version = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap());
        if version != VERSION {
            return Err(NanoError::SerializationError(format!(
                "unsupported version {version}"
            )));
        }
        let count = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
        if count != self.layers.len() {
            return Err(NanoError::SerializationError(format!(
                "layer count {count} does not match model ({})",
                self.layers.len()
            )));
        }

        let mut staged = vec![0.0; self.params.len()];
        for (i, layer) in self.layers.iter().enumerate() {
            let nlen = u16::from_le_bytes(cursor.take(2)?.try_into().unwrap()) as usize;
            let name = std::str::from_utf8(cursor.take(nlen)?)
                .map_err(|_| NanoError::SerializationError("bad layer name".into()))?;
            if name != layer.name() {
                return Err(NanoError::SerializationError(format!(
                    "layer {i} is '{name}', expected '{}'",
                    layer.name()
                )));
            }
            let pcount = u64::from_le_bytes(cursor.take(8)?.try_into().unwrap()) as usize;
            if pcount != layer.psize() {
                return Err(NanoError::SerializationError(format!(
                    "layer '{name}' carries {pcount} parameters, expected {}",
                    layer.psize()
                )));
            }
            for v in staged[self.offsets[i]..self.offsets[i + 1]].iter_mut() {
                *v = scalar_from_le(cursor.take(SCALAR_BYTES)?);
            }
        }
        if cursor.pos != body.len() {
            return Err(NanoError::SerializationError("trailing bytes".into()));
        }

        self.params.copy_from_slice(&staged);
        Ok(())
    }

    /// Saves the model parameters to a file.
    ///
    /// # Errors
    ///
    /// Returns `NanoError::Io` if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> NanoResult<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Loads model parameters from a file written by [`Model::save`].
    ///
    /// # Errors
    ///
    /// Returns `NanoError::Io` if the file is unreadable and
    /// `NanoError::SerializationError` if its content does not match the
    /// current architecture; prior parameters are kept on failure.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> NanoResult<()> {
        let mut r = BufReader::new(File::open(path)?);
        self.read_from(&mut r)
    }
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> NanoResult<&'a [u8]> {
        if self.pos + n > self.body.len() {
            return Err(NanoError::SerializationError("truncated model file".into()));
        }
        let s = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

/// Checks that a model's declared dimensions match a pair of task
/// dimensions; used by trainers before allocating any evaluator.
pub fn check_compatible(model: &Model, idims: Dims3, odims: Dims3) -> NanoResult<()> {
    if model.idims() != idims || model.odims() != odims {
        return Err(NanoError::DimensionMismatch(format!(
            "model {:?} -> {:?} incompatible with task {:?} -> {:?}",
            model.idims(),
            model.odims(),
            idims,
            odims
        )));
    }
    if size3(idims) == 0 || size3(odims) == 0 {
        return Err(NanoError::DimensionMismatch("empty task dimensions".into()));
    }
    Ok(())
}
