pub mod run;
pub mod validate;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};

    /// A small gravity-loaded block with a horizontal crack through it.
    pub fn write_input(dir: &Path, nsteps: usize) -> PathBuf {
        std::fs::write(
            dir.join("crack.txt"),
            "! crack\n2 1\n2.0 0.75\n0.0 0.75\n0 1\n",
        )
        .unwrap();
        let input = serde_json::json!({
            "materials": [
                {"id": 0, "youngs_modulus": 1.0e6, "poisson_ratio": 0.3, "density": 1000.0}
            ],
            "mesh": {
                "origin": [0.0, 0.0], "spacing": [0.5, 0.5], "ncells": [4, 4],
                "boundary_conditions": [{"axis": 1, "side": "min", "direction": 1}]
            },
            "particles": [
                {"material_id": 0,
                 "generator": {"min": [0.0, 0.0], "max": [2.0, 1.0], "spacing": [0.25, 0.25]}}
            ],
            "analysis": {
                "dt": 1.0e-4, "nsteps": nsteps, "output_steps": 2,
                "locate_particles": true, "gravity": [0.0, -9.81],
                "discontinuity": [
                    {"type": "crack", "id": 0, "io_type": "Ascii2D", "file": "crack.txt",
                     "frictional_coefficient": 0.3}
                ]
            }
        });
        let path = dir.join("input.json");
        std::fs::write(&path, serde_json::to_string_pretty(&input).unwrap()).unwrap();
        path
    }
}
