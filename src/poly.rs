//! Dense polynomials over the scalar field, matching the `phi_k`/`phi_hat_k` polynomials each
//! ACSS dealer samples and the Lagrange interpolation used throughout key derivation, share
//! recovery, and the ABA common coin.

use crate::group::{FieldElement, Scalar};
use rand::{CryptoRng, RngCore};

/// A dense polynomial `a_0 + a_1 x + … + a_deg x^deg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polynomial {
    coeffs: Vec<Scalar>,
}

impl Polynomial {
    pub fn from_coeffs(coeffs: Vec<Scalar>) -> Self {
        assert!(!coeffs.is_empty(), "a polynomial needs at least a constant term");
        Polynomial { coeffs }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn coeffs(&self) -> &[Scalar] {
        &self.coeffs
    }

    pub fn constant_term(&self) -> Scalar {
        self.coeffs[0]
    }

    /// Samples a random degree-`degree` polynomial with the given constant term, i.e. `phi(0) =
    /// constant`. This is how every ACSS dealer samples `phi_0`/`phi_k`/`phi_hat_k`.
    pub fn random_with_constant(
        degree: usize,
        constant: Scalar,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Self {
        let mut coeffs = Vec::with_capacity(degree + 1);
        coeffs.push(constant);
        for _ in 0..degree {
            coeffs.push(Scalar::random(rng));
        }
        Polynomial { coeffs }
    }

    /// Evaluates the polynomial at `x` via Horner's method.
    pub fn evaluate(&self, x: Scalar) -> Scalar {
        let mut acc = Scalar::zero();
        for coeff in self.coeffs.iter().rev() {
            acc = acc * x + *coeff;
        }
        acc
    }
}

/// The Lagrange coefficient for party index `i` (0-based) over the evaluation points `{j+1 : j in
/// all_idxs}`, evaluated at `x = target`.
fn lagrange_coeff_at(i: usize, all_idxs: &[usize], target: Scalar) -> Scalar {
    let xi = Scalar::from_u64((i + 1) as u64);
    let mut num = Scalar::one();
    let mut den = Scalar::one();
    for &j in all_idxs {
        if j == i {
            continue;
        }
        let xj = Scalar::from_u64((j + 1) as u64);
        num = num * (target - xj);
        den = den * (xi - xj);
    }
    num * den.invert().expect("evaluation points are pairwise distinct by construction")
}

/// Lagrange-interpolates the polynomial implied by `points` (pairs of `(party index, value)`,
/// 0-based indices, evaluation point `index + 1`) and evaluates the interpolant at `x`.
///
/// Matches `original_source/adkg/adkg.py`'s `interpolate_at` / `polynomials_over(field).interpolate`.
pub fn interpolate_at(points: &[(usize, Scalar)], x: Scalar) -> Scalar {
    assert!(!points.is_empty(), "need at least one point to interpolate");
    let idxs: Vec<usize> = points.iter().map(|(i, _)| *i).collect();
    points
        .iter()
        .map(|(i, v)| *v * lagrange_coeff_at(*i, &idxs, x))
        .fold(Scalar::zero(), |a, b| a + b)
}

/// Interpolates at `x = 0`, the common case used to recover a shared secret from threshold shares.
pub fn interpolate_at_zero(points: &[(usize, Scalar)]) -> Scalar {
    interpolate_at(points, Scalar::zero())
}

/// The Lagrange coefficient `λ_i` for interpolating at `x = 0` given the party-index set
/// `all_idxs` (0-based), used both for exponent interpolation of group elements (`pk =
/// Σ λ_j · X_j`) and resharing-style scaling.
pub fn lagrange_coeff_zero(i: usize, all_idxs: &[usize]) -> Scalar {
    lagrange_coeff_at(i, all_idxs, Scalar::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn evaluate_matches_direct_computation() {
        // phi(x) = 3 + 2x + x^2
        let phi = Polynomial::from_coeffs(vec![
            Scalar::from_u64(3),
            Scalar::from_u64(2),
            Scalar::from_u64(1),
        ]);
        assert_eq!(phi.evaluate(Scalar::from_u64(0)), Scalar::from_u64(3));
        assert_eq!(phi.evaluate(Scalar::from_u64(2)), Scalar::from_u64(3 + 4 + 4));
    }

    #[test]
    fn interpolate_recovers_constant_term() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let secret = Scalar::from_u64(1234);
        let degree = 3;
        let phi = Polynomial::random_with_constant(degree, secret, &mut rng);

        // any `degree + 1` shares reconstruct the secret
        let points: Vec<(usize, Scalar)> = (0..=degree)
            .map(|i| (i, phi.evaluate(Scalar::from_u64((i + 1) as u64))))
            .collect();
        assert_eq!(interpolate_at_zero(&points), secret);
    }

    #[test]
    fn interpolate_with_different_subset_agrees() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let secret = Scalar::from_u64(99);
        let degree = 2;
        let phi = Polynomial::random_with_constant(degree, secret, &mut rng);

        let all_points: Vec<(usize, Scalar)> = (0..6)
            .map(|i| (i, phi.evaluate(Scalar::from_u64((i + 1) as u64))))
            .collect();

        let subset_a = &all_points[0..=degree];
        let subset_b = &all_points[3..3 + degree + 1];
        assert_eq!(interpolate_at_zero(subset_a), secret);
        assert_eq!(interpolate_at_zero(subset_b), secret);
    }
}
