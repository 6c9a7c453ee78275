// Lidar particle filter localization demo
//
// A robot drives circles inside a walled room. Its odometry drifts; scans
// are ray cast from the true pose. The filter tracks the true pose and the
// tracking error is logged as it goes.
//
// Usage: RUST_LOG=info cargo run --bin mcl_demo [config.yaml]

use std::env;
use std::error::Error;
use std::sync::Arc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use lidar_mcl::mapping::{simulate_scan, CellState};
use lidar_mcl::{
    LocalizationConfig, LocalizationEngine, OccupancyField, OccupancyGrid, OdometryReading, Pose2D,
};

const DT: f64 = 0.1; // time tick [s]
const SIM_TIME: f64 = 40.0; // simulation time [s]
const BEAM_COUNT: usize = 360;
const MAX_RANGE: f64 = 8.0; // [m]

// Odometry noise per tick
const ODOM_TRANSLATION_STD: f64 = 0.01; // [m]
const ODOM_ROTATION_STD: f64 = 0.005; // [rad]

// 10 m x 8 m room at 0.1 m with a pillar and a partition wall
fn build_room() -> Result<OccupancyGrid, Box<dyn Error>> {
    let (width, height) = (100, 80);
    let mut grid = OccupancyGrid::new(width, height, 0.1, Pose2D::new(-5.0, -4.0, 0.0))?;
    for ix in 0..width {
        grid.set(ix, 0, CellState::Occupied);
        grid.set(ix, height - 1, CellState::Occupied);
    }
    for iy in 0..height {
        grid.set(0, iy, CellState::Occupied);
        grid.set(width - 1, iy, CellState::Occupied);
    }
    for ix in 60..66 {
        for iy in 20..26 {
            grid.set(ix, iy, CellState::Occupied);
        }
    }
    for iy in 55..height {
        grid.set(30, iy, CellState::Occupied);
    }
    Ok(grid)
}

fn calc_input() -> (f64, f64) {
    let v = 0.5; // [m/s]
    let yaw_rate = 0.25; // [rad/s]
    (v, yaw_rate)
}

fn motion_model(pose: &Pose2D, v: f64, yaw_rate: f64) -> Pose2D {
    pose.compose(&Pose2D::new(v * DT, 0.0, yaw_rate * DT))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => LocalizationConfig::from_yaml_file(path)?,
        None => LocalizationConfig {
            seed: Some(7),
            ..Default::default()
        },
    };

    let grid = build_room()?;
    let field = Arc::new(OccupancyField::build(&grid, &config.field)?);
    let mut engine = LocalizationEngine::new(config, field)?;
    let reader = engine.snapshot_reader();

    let mut rng = StdRng::seed_from_u64(42);
    let translation_noise = Normal::new(0.0, ODOM_TRANSLATION_STD)?;
    let rotation_noise = Normal::new(0.0, ODOM_ROTATION_STD)?;

    let mut x_true = Pose2D::new(-1.0, -1.0, 0.0);
    let mut x_odom = Pose2D::origin();

    info!("Lidar MCL demo start");
    engine.push_odometry(OdometryReading::new(x_odom, 0.0));
    engine.initialize(&x_true)?;

    let mut time = 0.0;
    let mut max_error: f64 = 0.0;
    while time <= SIM_TIME {
        time += DT;
        let (v, yaw_rate) = calc_input();
        x_true = motion_model(&x_true, v, yaw_rate);

        let measured = Pose2D::new(
            v * DT + translation_noise.sample(&mut rng),
            0.0,
            yaw_rate * DT + rotation_noise.sample(&mut rng),
        );
        x_odom = x_odom.compose(&measured);

        engine.push_odometry(OdometryReading::new(x_odom, time));
        engine.push_scan(simulate_scan(&grid, &x_true, BEAM_COUNT, MAX_RANGE)?);

        if let Some(report) = engine.spin_once()? {
            let error = report.mean_pose.position().distance(&x_true.position());
            max_error = max_error.max(error);
            if report.effective_sample_size < 0.1 * engine.config().particle_count as f64 {
                warn!("Particle depletion: Neff {:.1}", report.effective_sample_size);
            }
            if time.rem_euclid(5.0) < DT {
                let corrected = engine.correct_odometry(&x_odom);
                let drift = corrected.position().distance(&x_odom.position());
                info!(
                    "Time: {:.1}, Est: ({:.2}, {:.2}), True: ({:.2}, {:.2}), \
                     error {:.3} m, odom correction {:.3} m",
                    time, report.mean_pose.x, report.mean_pose.y, x_true.x, x_true.y, error, drift
                );
            }
        }
    }

    let snapshot = reader.latest();
    info!(
        "Lidar MCL demo completed: {} cycles, max error {:.3} m",
        snapshot.cycles, max_error
    );
    Ok(())
}
