//! Analytic benchmark functions used to exercise the optimizers.

use crate::problem::Problem;
use crate::Scalar;

/// `f(x) = 1/2 * |x|^2`, minimum at the origin.
pub struct Sphere {
    pub dims: usize,
}

impl Problem for Sphere {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        0.5 * x.iter().map(|v| v * v).sum::<Scalar>()
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        g.copy_from_slice(x);
        self.value(x)
    }
}

/// Rosenbrock's valley, `sum(100 * (x_{i+1} - x_i^2)^2 + (1 - x_i)^2)`.
pub struct Rosenbrock {
    pub dims: usize,
}

impl Problem for Rosenbrock {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        (0..self.dims - 1)
            .map(|i| {
                let a = x[i + 1] - x[i] * x[i];
                let b = 1.0 - x[i];
                100.0 * a * a + b * b
            })
            .sum()
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        g.fill(0.0);
        for i in 0..self.dims - 1 {
            let a = x[i + 1] - x[i] * x[i];
            g[i] += -400.0 * a * x[i] - 2.0 * (1.0 - x[i]);
            g[i + 1] += 200.0 * a;
        }
        self.value(x)
    }
}

/// Dixon-Price, `(x_0 - 1)^2 + sum(i * (2 * x_i^2 - x_{i-1})^2)`.
pub struct DixonPrice {
    pub dims: usize,
}

impl Problem for DixonPrice {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        let mut f = (x[0] - 1.0) * (x[0] - 1.0);
        for i in 1..self.dims {
            let a = 2.0 * x[i] * x[i] - x[i - 1];
            f += (i + 1) as Scalar * a * a;
        }
        f
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        g.fill(0.0);
        g[0] = 2.0 * (x[0] - 1.0);
        for i in 1..self.dims {
            let w = (i + 1) as Scalar;
            let a = 2.0 * x[i] * x[i] - x[i - 1];
            g[i] += w * 2.0 * a * 4.0 * x[i];
            g[i - 1] += -w * 2.0 * a;
        }
        self.value(x)
    }
}

/// Himmelblau's function over two variables.
pub struct Himmelblau;

impl Problem for Himmelblau {
    fn size(&self) -> usize {
        2
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        let a = x[0] * x[0] + x[1] - 11.0;
        let b = x[0] + x[1] * x[1] - 7.0;
        a * a + b * b
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        let a = x[0] * x[0] + x[1] - 11.0;
        let b = x[0] + x[1] * x[1] - 7.0;
        g[0] = 4.0 * a * x[0] + 2.0 * b;
        g[1] = 2.0 * a + 4.0 * b * x[1];
        a * a + b * b
    }
}

/// Styblinski-Tang, `sum(x^4 - 16 * x^2 + 5 * x)`.
pub struct StyblinskiTang {
    pub dims: usize,
}

impl Problem for StyblinskiTang {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        x.iter().map(|v| v * v * v * v - 16.0 * v * v + 5.0 * v).sum()
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        for (gv, v) in g.iter_mut().zip(x) {
            *gv = 4.0 * v * v * v - 32.0 * v + 5.0;
        }
        self.value(x)
    }
}

/// Cauchy, `sum(log(1 + x^2))`, minimum at the origin.
pub struct Cauchy {
    pub dims: usize,
}

impl Problem for Cauchy {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        x.iter().map(|v| (v * v).ln_1p()).sum()
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        for (gv, v) in g.iter_mut().zip(x) {
            *gv = 2.0 * v / (1.0 + v * v);
        }
        self.value(x)
    }
}

/// Chung-Reynolds, `(|x|^2)^2`, convex with minimum at the origin.
pub struct ChungReynolds {
    pub dims: usize,
}

impl Problem for ChungReynolds {
    fn size(&self) -> usize {
        self.dims
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        let u = x.iter().map(|v| v * v).sum::<Scalar>();
        u * u
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        let u = x.iter().map(|v| v * v).sum::<Scalar>();
        for (gv, v) in g.iter_mut().zip(x) {
            *gv = 4.0 * u * v;
        }
        u * u
    }
}

/// The three-hump camel function over two variables.
pub struct ThreeHumpCamel;

impl Problem for ThreeHumpCamel {
    fn size(&self) -> usize {
        2
    }

    fn value(&mut self, x: &[Scalar]) -> Scalar {
        let (a, b) = (x[0], x[1]);
        2.0 * a * a - 1.05 * a.powi(4) + a.powi(6) / 6.0 + a * b + b * b
    }

    fn value_and_grad(&mut self, x: &[Scalar], g: &mut [Scalar]) -> Scalar {
        let (a, b) = (x[0], x[1]);
        g[0] = 4.0 * a - 4.2 * a.powi(3) + a.powi(5) + b;
        g[1] = a + 2.0 * b;
        self.value(x)
    }
}

/// The full benchmark suite at the given dimension (fixed-dimension
/// functions ignore `dims`).
pub fn suite(dims: usize) -> Vec<(&'static str, Box<dyn Problem>)> {
    vec![
        ("sphere", Box::new(Sphere { dims })),
        ("rosenbrock", Box::new(Rosenbrock { dims: dims.max(2) })),
        ("dixon-price", Box::new(DixonPrice { dims: dims.max(2) })),
        ("himmelblau", Box::new(Himmelblau)),
        ("styblinski-tang", Box::new(StyblinskiTang { dims })),
        ("cauchy", Box::new(Cauchy { dims })),
        ("chung-reynolds", Box::new(ChungReynolds { dims })),
        ("3hump-camel", Box::new(ThreeHumpCamel)),
    ]
}
