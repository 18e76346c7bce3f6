use serde::{Deserialize, Serialize};

/// Numerical parameters of the simulation. Every per-stage constant lives
/// here rather than inline in the pipeline, so the behaviour of a single
/// stage can be tuned (and tested) in isolation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Per-step decay applied to the advected velocity field.
    pub velocity_dissipation: f32,
    /// Per-step decay applied to the advected temperature field.
    pub temperature_dissipation: f32,
    /// Per-step decay applied to the advected density field. Close to one so
    /// the smoke lingers visually.
    pub density_dissipation: f32,

    /// Temperature of still air. Cells warmer than this rise.
    pub ambient_temperature: f32,
    /// Thermal-expansion coefficient of the buoyancy force.
    pub sigma: f32,
    /// How strongly smoke density weighs the fluid down.
    pub kappa: f32,

    /// Number of Jacobi relaxation passes per pressure solve. A fixed count
    /// trades convergence accuracy for a constant per-frame cost.
    pub pressure_iterations: u32,
    /// Scale of the pressure gradient subtracted during projection.
    pub gradient_scale: f32,

    /// Normalised grid coordinate of the continuous heat source.
    pub splat_point: [f32; 2],
    /// Falloff radius of the source, in normalised grid units.
    pub splat_radius: f32,
    /// Temperature injected at the source every step.
    pub splat_temperature: f32,
    /// Smoke density injected at the source every step.
    pub splat_density: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            velocity_dissipation: 0.99,
            temperature_dissipation: 0.99,
            density_dissipation: 0.9999,

            ambient_temperature: 0.0,
            sigma: 1.0,
            kappa: 0.05,

            pressure_iterations: 30,
            gradient_scale: 1.0,

            splat_point: [0.5, 0.0],
            splat_radius: 0.1,
            splat_temperature: 10.0,
            splat_density: 1.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_dissipation_keeps_density_longest() {
        let settings = Settings::default();
        assert_eq!(settings.velocity_dissipation, 0.99);
        assert_eq!(settings.temperature_dissipation, 0.99);
        assert_eq!(settings.density_dissipation, 0.9999);
        assert!(settings.density_dissipation > settings.velocity_dissipation);
    }

    #[test]
    fn default_buoyancy_constants() {
        let settings = Settings::default();
        assert_eq!(settings.ambient_temperature, 0.0);
        assert_eq!(settings.sigma, 1.0);
        assert_eq!(settings.kappa, 0.05);
    }

    #[test]
    fn default_solver_and_source() {
        let settings = Settings::default();
        assert_eq!(settings.pressure_iterations, 30);
        assert_eq!(settings.gradient_scale, 1.0);
        assert_eq!(settings.splat_point, [0.5, 0.0]);
        assert_eq!(settings.splat_radius, 0.1);
        assert_eq!(settings.splat_temperature, 10.0);
        assert_eq!(settings.splat_density, 1.0);
    }

    #[test]
    fn deserializes_partial_settings() {
        let settings: Settings =
            serde_json::from_str(r#"{ "pressureIterations": 60 }"#).unwrap();
        assert_eq!(settings.pressure_iterations, 60);
        assert_eq!(settings.velocity_dissipation, 0.99);
    }
}
