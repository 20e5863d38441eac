use std::time::Duration;

use anyhow::{bail, Context, Result};
use nalgebra::UnitQuaternion;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vio_bootstrap::config::BootstrapConfig;
use vio_bootstrap::imu::simulator::{ImuSimulator, MotionProfile};
use vio_bootstrap::imu::ImuBias;
use vio_bootstrap::system::VioBootstrap;

/// Keyframes generated for the synthetic run.
const NUM_KEYFRAMES: usize = 12;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BootstrapConfig::from_yaml_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => BootstrapConfig::default(),
    };

    // Monocular runs report poses in half-metre units
    let scale = if config.alignment.estimate_scale { 0.5 } else { 1.0 };
    let simulator = ImuSimulator::new(MotionProfile::excited())
        .with_visual_frame(UnitQuaternion::from_euler_angles(0.3, -0.2, 0.9))
        .with_scale(scale);
    let sequence = simulator.generate(NUM_KEYFRAMES);
    info!(
        "Simulated {} IMU samples and {} keyframes",
        sequence.samples.len(),
        sequence.keyframes.len()
    );

    let mut bootstrap = VioBootstrap::new(config, ImuBias::zero())?;

    // Stream each keyframe right after the IMU samples up to its timestamp
    let mut next_sample = 0;
    for (k, keyframe) in sequence.keyframes.iter().enumerate() {
        let last = k * simulator.samples_per_keyframe;
        for sample in &sequence.samples[next_sample..=last] {
            bootstrap.add_imu_measurement(*sample)?;
        }
        next_sample = last + 1;
        bootstrap.add_keyframe(keyframe.timestamp_ns, keyframe.pose)?;
    }

    let Some(result) = bootstrap.wait_for_result(Duration::from_secs(5)) else {
        bootstrap.shutdown();
        bail!("Initialization did not succeed within 5 s");
    };
    bootstrap.shutdown();

    let gravity_error = (result.gravity - sequence.gravity).norm();
    let velocity_error = (result.visual_nav_state.velocity - sequence.velocities[0]).norm();
    println!("Gyro bias:      {:?}", result.gyro_bias.as_slice());
    println!("Gravity:        {:?} (error {:.2e})", result.gravity.as_slice(), gravity_error);
    println!("Velocity v0:    {:?} (error {:.2e})", result.visual_nav_state.velocity.as_slice(), velocity_error);
    println!("World v0:       {:?}", result.nav_state.velocity.as_slice());
    println!("Scale:          {:.4} (true {:.4})", result.scale, sequence.scale);
    println!("Iterations:     {} (converged: {})", result.iterations, result.converged);

    Ok(())
}
