//! Constitutive models for material points.
//!
//! Only isotropic linear elasticity is provided; stress is updated
//! incrementally from the strain increment of each step.

use crate::error::{Error, Result};
use crate::types::{ConstitutiveMatrix, StrainTensor, StressTensor};
use nalgebra::Matrix6;
use serde::Deserialize;

/// Material record from the `materials` input section.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialConfig {
    pub id: usize,
    #[serde(rename = "type", default = "default_material_type")]
    pub material_type: String,
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub density: f64,
}

fn default_material_type() -> String {
    "LinearElastic".to_string()
}

/// Isotropic linear elastic material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Material id referenced by particles.
    pub id: usize,
    /// Young's modulus (Pa).
    pub youngs_modulus: f64,
    /// Poisson's ratio (dimensionless).
    pub poissons_ratio: f64,
    /// Mass density (kg/m³).
    pub density: f64,
}

impl Material {
    /// Create a new isotropic linear elastic material.
    ///
    /// # Errors
    ///
    /// Returns error if material properties are physically invalid.
    pub fn new(id: usize, youngs_modulus: f64, poissons_ratio: f64, density: f64) -> Result<Self> {
        if youngs_modulus <= 0.0 {
            return Err(Error::InvalidMaterial(format!(
                "material {id}: Young's modulus must be positive"
            )));
        }
        if poissons_ratio <= -1.0 || poissons_ratio >= 0.5 {
            return Err(Error::InvalidMaterial(format!(
                "material {id}: Poisson's ratio must be in range (-1, 0.5)"
            )));
        }
        if density <= 0.0 {
            return Err(Error::InvalidMaterial(format!(
                "material {id}: density must be positive"
            )));
        }
        Ok(Self {
            id,
            youngs_modulus,
            poissons_ratio,
            density,
        })
    }

    /// Build from an input record, rejecting unknown model types.
    pub fn from_config(config: &MaterialConfig) -> Result<Self> {
        if config.material_type != "LinearElastic" {
            return Err(Error::InvalidMaterial(format!(
                "material {}: unknown type '{}'",
                config.id, config.material_type
            )));
        }
        Self::new(
            config.id,
            config.youngs_modulus,
            config.poisson_ratio,
            config.density,
        )
    }

    /// Shear modulus G = E / (2(1 + ν)).
    pub fn shear_modulus(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poissons_ratio))
    }

    /// Bulk modulus K = E / (3(1 - 2ν)).
    pub fn bulk_modulus(&self) -> f64 {
        self.youngs_modulus / (3.0 * (1.0 - 2.0 * self.poissons_ratio))
    }

    /// Dilatational (P-wave) speed, which bounds the stable explicit time step.
    pub fn p_wave_speed(&self) -> f64 {
        ((self.bulk_modulus() + 4.0 / 3.0 * self.shear_modulus()) / self.density).sqrt()
    }

    /// 3D constitutive matrix for isotropic linear elasticity.
    ///
    /// Returns the 6x6 matrix D such that σ = D * ε in Voigt notation.
    pub fn constitutive_3d(&self) -> ConstitutiveMatrix {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;

        let factor = e / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let c11 = factor * (1.0 - nu);
        let c12 = factor * nu;
        let c44 = factor * (1.0 - 2.0 * nu) / 2.0; // = G

        Matrix6::new(
            c11, c12, c12, 0.0, 0.0, 0.0,
            c12, c11, c12, 0.0, 0.0, 0.0,
            c12, c12, c11, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, c44, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, c44, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, c44,
        )
    }

    /// Incremental stress update σ_{n+1} = σ_n + D Δε.
    pub fn compute_stress(&self, stress: &StressTensor, dstrain: &StrainTensor) -> StressTensor {
        StressTensor(stress.0 + self.constitutive_3d() * dstrain.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn steel() -> Material {
        Material::new(0, 200e9, 0.3, 7850.0).unwrap()
    }

    #[test]
    fn test_invalid_properties() {
        assert!(Material::new(0, -100e9, 0.3, 1.0).is_err());
        assert!(Material::new(0, 200e9, 0.5, 1.0).is_err());
        assert!(Material::new(0, 200e9, -1.0, 1.0).is_err());
        assert!(Material::new(0, 200e9, 0.3, 0.0).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let config: MaterialConfig = serde_json::from_str(
            r#"{"id": 1, "type": "MohrCoulomb", "youngs_modulus": 1e6, "poisson_ratio": 0.3, "density": 1000}"#,
        )
        .unwrap();
        assert!(matches!(Material::from_config(&config), Err(Error::InvalidMaterial(_))));
    }

    #[test]
    fn test_default_type_is_linear_elastic() {
        let config: MaterialConfig = serde_json::from_str(
            r#"{"id": 3, "youngs_modulus": 1e6, "poisson_ratio": 0.25, "density": 1000}"#,
        )
        .unwrap();
        let material = Material::from_config(&config).unwrap();
        assert_eq!(material.id, 3);
    }

    #[test]
    fn test_bulk_and_shear_modulus() {
        let mat = steel();
        assert_relative_eq!(mat.shear_modulus(), 200e9 / 2.6, epsilon = 1e-3);
        assert_relative_eq!(mat.bulk_modulus(), 200e9 / 1.2, epsilon = 1e-3);
    }

    #[test]
    fn test_constitutive_symmetry() {
        let d = steel().constitutive_3d();
        for i in 0..6 {
            for j in 0..6 {
                assert_relative_eq!(d[(i, j)], d[(j, i)], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_uniaxial_strain_stress() {
        let mat = Material::new(0, 1.0e6, 0.0, 1000.0).unwrap();
        let dstrain = StrainTensor::new([1e-3, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let stress = mat.compute_stress(&StressTensor::zero(), &dstrain);
        assert_relative_eq!(stress.0[0], 1.0e3, epsilon = 1e-9);
        assert_relative_eq!(stress.0[1], 0.0);
    }

    #[test]
    fn test_p_wave_speed_one_dimensional_limit() {
        // ν = 0 → constrained modulus equals E.
        let mat = Material::new(0, 1.0e6, 0.0, 1000.0).unwrap();
        assert_relative_eq!(mat.p_wave_speed(), (1.0e6f64 / 1000.0).sqrt(), epsilon = 1e-9);
    }
}
