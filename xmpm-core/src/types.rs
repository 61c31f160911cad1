//! Core data types shared by nodes, particles and the discontinuity code.
//!
//! - Dynamically sized vectors for nodal/particle kinematics (2D or 3D)
//! - Stress and strain tensors in Voigt notation

use nalgebra::{DVector, Matrix3, Matrix6, Vector6};

/// A vector whose length is the problem dimension (or the DOF count).
pub type Vector = DVector<f64>;

/// Symmetric stress tensor in Voigt notation.
///
/// Components are ordered as: [σ_xx, σ_yy, σ_zz, τ_xy, τ_yz, τ_xz].
/// 2D runs are plane strain and keep σ_zz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressTensor(pub Vector6<f64>);

impl StressTensor {
    /// Create a new stress tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero stress state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Mean normal stress. Pressure is its negative.
    pub fn hydrostatic(&self) -> f64 {
        (self.0[0] + self.0[1] + self.0[2]) / 3.0
    }

    /// Replace the hydrostatic part, keeping the deviator.
    pub fn with_hydrostatic(&self, mean: f64) -> Self {
        let shift = mean - self.hydrostatic();
        let mut s = self.0;
        for i in 0..3 {
            s[i] += shift;
        }
        Self(s)
    }

    /// Extract the full 3x3 symmetric stress matrix.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let s = &self.0;
        Matrix3::new(
            s[0], s[3], s[5],
            s[3], s[1], s[4],
            s[5], s[4], s[2],
        )
    }
}

/// Symmetric strain tensor in Voigt notation.
///
/// Components are ordered as: [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz]
/// where γ = 2ε for engineering shear strain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainTensor(pub Vector6<f64>);

impl StrainTensor {
    /// Create a new strain tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero strain state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Strain increment from a velocity gradient over `dt`.
    ///
    /// `grad_v[(i, j)] = ∂v_i/∂x_j`; only the leading `dim × dim` block is read.
    pub fn from_velocity_gradient(grad_v: &nalgebra::DMatrix<f64>, dt: f64) -> Self {
        let dim = grad_v.nrows();
        let g = |i: usize, j: usize| if i < dim && j < dim { grad_v[(i, j)] } else { 0.0 };
        Self::new([
            g(0, 0) * dt,
            g(1, 1) * dt,
            g(2, 2) * dt,
            (g(0, 1) + g(1, 0)) * dt,
            (g(1, 2) + g(2, 1)) * dt,
            (g(0, 2) + g(2, 0)) * dt,
        ])
    }

    /// Compute volumetric strain.
    pub fn volumetric(&self) -> f64 {
        self.0[0] + self.0[1] + self.0[2]
    }
}

/// Constitutive matrix (material stiffness) in Voigt notation.
///
/// Maps strain tensor to stress tensor: σ = D * ε
pub type ConstitutiveMatrix = Matrix6<f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_hydrostatic_stress() {
        let stress = StressTensor::new([100.0, 200.0, 300.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(stress.hydrostatic(), 200.0, epsilon = 1e-10);
    }

    #[test]
    fn test_with_hydrostatic_keeps_deviator() {
        let stress = StressTensor::new([100.0, 200.0, 300.0, 5.0, 0.0, 0.0]);
        let shifted = stress.with_hydrostatic(-50.0);
        assert_relative_eq!(shifted.hydrostatic(), -50.0, epsilon = 1e-10);
        assert_relative_eq!(shifted.0[1] - shifted.0[0], 100.0, epsilon = 1e-10);
        assert_relative_eq!(shifted.0[3], 5.0);
    }

    #[test]
    fn test_strain_from_velocity_gradient_2d() {
        let grad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.5, -1.0]);
        let strain = StrainTensor::from_velocity_gradient(&grad, 0.1);
        assert_relative_eq!(strain.0[0], 0.1, epsilon = 1e-14);
        assert_relative_eq!(strain.0[1], -0.1, epsilon = 1e-14);
        assert_relative_eq!(strain.0[2], 0.0);
        assert_relative_eq!(strain.0[3], 0.25, epsilon = 1e-14);
        assert_relative_eq!(strain.volumetric(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_to_matrix_symmetric() {
        let stress = StressTensor::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let m = stress.to_matrix();
        assert_eq!(m, m.transpose());
        assert_relative_eq!(m[(0, 2)], 6.0);
    }
}
