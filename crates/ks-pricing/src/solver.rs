//! Safeguarded Newton root finder used for yields and implied volatility.

/// Iteration limits for [`newton_bracketed`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 200,
        }
    }
}

/// A converged root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    pub value: f64,
    pub iterations: usize,
}

/// Newton iteration kept inside the bracket `[lo, hi]`; steps that leave the
/// bracket (or meet a flat derivative) fall back to bisection.
///
/// `f` returns the function value and its derivative. Returns `None` when the
/// bracket does not straddle a sign change or the budget is exhausted.
pub fn newton_bracketed<F>(f: F, mut lo: f64, mut hi: f64, guess: f64, config: &RootConfig) -> Option<Root>
where
    F: Fn(f64) -> (f64, f64),
{
    let (f_lo, _) = f(lo);
    let (f_hi, _) = f(hi);
    if !f_lo.is_finite() || !f_hi.is_finite() || f_lo.signum() == f_hi.signum() {
        return None;
    }
    let lo_sign = f_lo.signum();

    let mut x = if guess > lo && guess < hi {
        guess
    } else {
        0.5 * (lo + hi)
    };

    for iteration in 0..config.max_iterations {
        let (fx, dfx) = f(x);
        if !fx.is_finite() {
            return None;
        }
        if fx.abs() < config.tolerance || (hi - lo).abs() < config.tolerance {
            return Some(Root {
                value: x,
                iterations: iteration,
            });
        }

        if fx.signum() == lo_sign {
            lo = x;
        } else {
            hi = x;
        }

        let newton = if dfx.abs() > f64::EPSILON {
            x - fx / dfx
        } else {
            f64::NAN
        };
        if newton.is_finite() && (newton - x).abs() < config.tolerance * (1.0 + x.abs()) {
            return Some(Root {
                value: newton,
                iterations: iteration + 1,
            });
        }
        x = if newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn finds_square_root() {
        let root = newton_bracketed(|x| (x * x - 2.0, 2.0 * x), 0.0, 2.0, 1.0, &RootConfig::default()).unwrap();
        assert_relative_eq!(root.value, std::f64::consts::SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn bisection_rescues_bad_derivative() {
        // Zero derivative everywhere forces pure bisection.
        let root = newton_bracketed(|x| (x - 0.3, 0.0), 0.0, 1.0, 0.9, &RootConfig::default()).unwrap();
        assert_relative_eq!(root.value, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn rejects_bracket_without_sign_change() {
        assert!(newton_bracketed(|x| (x * x + 1.0, 2.0 * x), -1.0, 1.0, 0.0, &RootConfig::default()).is_none());
    }
}
