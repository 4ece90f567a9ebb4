//! Real roots of cubic equations, used to find when a particle crosses a
//! triangle of a tet whose vertices move linearly in time.

/// `a x^3 + b x^2 + c x + d`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicEqn {
    /// Cubic coefficient.
    pub a: f64,
    /// Quadratic coefficient.
    pub b: f64,
    /// Linear coefficient.
    pub c: f64,
    /// Constant coefficient.
    pub d: f64,
}

impl CubicEqn {
    /// Create from coefficients, highest order first.
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    /// Evaluate at `x`.
    pub fn value(&self, x: f64) -> f64 {
        ((self.a * x + self.b) * x + self.c) * x + self.d
    }

    /// First derivative at `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        (3.0 * self.a * x + 2.0 * self.b) * x + self.c
    }

    /// All real roots, unordered. Leading coefficients that are negligible
    /// relative to the others reduce the order of the equation.
    pub fn roots(&self) -> Vec<f64> {
        let scale = self.b.abs().max(self.c.abs()).max(self.d.abs());
        if self.a.abs() <= f64::EPSILON * scale || self.a == 0.0 {
            return quadratic_roots(self.b, self.c, self.d);
        }
        if self.d == 0.0 {
            let mut roots = quadratic_roots(self.a, self.b, self.c);
            roots.push(0.0);
            return roots;
        }

        let p = self.b / self.a;
        let q = self.c / self.a;
        let r = self.d / self.a;

        let qq = (p * p - 3.0 * q) / 9.0;
        let rr = (2.0 * p * p * p - 9.0 * p * q + 27.0 * r) / 54.0;
        let qq3 = qq * qq * qq;
        let shift = p / 3.0;

        let mut roots = if rr * rr < qq3 {
            let theta = (rr / qq3.sqrt()).clamp(-1.0, 1.0).acos();
            let m = -2.0 * qq.sqrt();
            let two_pi = 2.0 * std::f64::consts::PI;
            vec![
                m * (theta / 3.0).cos() - shift,
                m * ((theta + two_pi) / 3.0).cos() - shift,
                m * ((theta - two_pi) / 3.0).cos() - shift,
            ]
        } else {
            let big = -rr.signum() * (rr.abs() + (rr * rr - qq3).sqrt()).cbrt();
            let small = if big != 0.0 { qq / big } else { 0.0 };
            let mut roots = vec![big + small - shift];
            if rr * rr == qq3 && big != 0.0 {
                roots.push(-0.5 * (big + small) - shift);
            }
            roots
        };

        for x in &mut roots {
            *x = self.polish(*x);
        }
        roots
    }

    fn polish(&self, x: f64) -> f64 {
        let fp = self.derivative(x);
        if fp == 0.0 || !fp.is_finite() {
            return x;
        }
        let next = x - self.value(x) / fp;
        if next.is_finite() && self.value(next).abs() <= self.value(x).abs() {
            next
        } else {
            x
        }
    }
}

/// Real roots of `a x^2 + b x + c`.
fn quadratic_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() <= f64::EPSILON * b.abs().max(c.abs()) || a == 0.0 {
        return if b != 0.0 { vec![-c / b] } else { Vec::new() };
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    if disc == 0.0 {
        return vec![-b / (2.0 * a)];
    }
    let sign = if b >= 0.0 { 1.0 } else { -1.0 };
    let q = -0.5 * (b + sign * disc.sqrt());
    if q == 0.0 {
        return vec![0.0];
    }
    vec![q / a, c / q]
}
