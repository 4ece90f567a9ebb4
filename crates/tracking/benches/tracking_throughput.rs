//! Tracking throughput -- particles moved per second on box meshes.
//!
//! Run with: cargo bench -p tracking --bench tracking_throughput

use std::time::Instant;
use tracking::{BoxMesh, Cloud, Convected, SideKind, SingleRank, TrackingSettings, Vector};

fn seeded_cloud(mesh: &tracking::PolyMesh, per_axis: usize) -> Cloud {
    let mut cloud = Cloud::new("bench", TrackingSettings::default());
    let spacing = 1.0 / per_axis as f64;
    for ix in 0..per_axis {
        for iy in 0..per_axis {
            for iz in 0..per_axis {
                let x = Vector::new(
                    (ix as f64 + 0.37) * spacing,
                    (iy as f64 + 0.53) * spacing,
                    (iz as f64 + 0.41) * spacing,
                );
                cloud.inject(mesh, &x, None, None).expect("inject");
            }
        }
    }
    cloud
}

fn main() {
    println!("=== Tracking Throughput ===\n");

    // (cells per axis, particles per axis, steps)
    let configs = [(8, 10, 20), (16, 20, 10), (32, 30, 5)];

    println!(
        "{:>8} {:>10} {:>8} {:>10} {:>14} {:>12}",
        "Cells", "Particles", "Steps", "Time (s)", "particles/s", "ms/step"
    );

    for &(cells, per_axis, steps) in &configs {
        let mesh = BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [cells; 3])
            .axis_pair(0, SideKind::Cyclic)
            .axis_pair(1, SideKind::Cyclic)
            .axis_pair(2, SideKind::Cyclic)
            .build()
            .expect("mesh");
        let mut cloud = seeded_cloud(&mesh, per_axis);
        let n = cloud.len();

        // Roughly three cells per step in a skewed direction
        let motion = Convected {
            velocity: Vector::new(3.0, 1.7, 0.9) / cells as f64,
        };
        let mut transport = SingleRank::new();

        // Warmup
        cloud
            .move_particles(&mesh, &mut transport, &motion, 1.0)
            .expect("move");

        let start = Instant::now();
        for _ in 0..steps {
            cloud
                .move_particles(&mesh, &mut transport, &motion, 1.0)
                .expect("move");
        }
        let elapsed = start.elapsed().as_secs_f64();
        let pps = (n * steps) as f64 / elapsed;
        let ms_per_step = elapsed * 1000.0 / steps as f64;

        println!(
            "{:>8} {:>10} {:>8} {:>10.3} {:>14.0} {:>12.2}",
            cells * cells * cells,
            n,
            steps,
            elapsed,
            pps,
            ms_per_step
        );
        assert_eq!(cloud.len(), n, "particles lost during the benchmark");
    }
}
