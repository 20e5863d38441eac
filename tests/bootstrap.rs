use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nalgebra::{UnitQuaternion, Vector3};

use vio_bootstrap::alignment::AlignmentEngine;
use vio_bootstrap::config::BootstrapConfig;
use vio_bootstrap::imu::simulator::{ImuSimulator, MotionProfile, SyntheticSequence};
use vio_bootstrap::imu::{ImuBias, ImuParams, InitState};
use vio_bootstrap::system::VioBootstrap;
use vio_bootstrap::InitError;

fn stream(bootstrap: &VioBootstrap, sequence: &SyntheticSequence, samples_per_keyframe: usize) {
    let mut next_sample = 0;
    for (k, keyframe) in sequence.keyframes.iter().enumerate() {
        let last = k * samples_per_keyframe;
        for sample in &sequence.samples[next_sample..=last] {
            bootstrap.add_imu_measurement(*sample).unwrap();
        }
        next_sample = last + 1;
        bootstrap
            .add_keyframe(keyframe.timestamp_ns, keyframe.pose)
            .unwrap();
    }
}

#[test]
fn threaded_matches_synchronous_engine() {
    let simulator = ImuSimulator::new(MotionProfile::excited())
        .with_visual_frame(UnitQuaternion::from_euler_angles(-0.2, 0.5, 0.1));
    let sequence = simulator.generate(5);

    let config = BootstrapConfig::default();
    let bootstrap = VioBootstrap::new(config, ImuBias::zero()).unwrap();
    stream(&bootstrap, &sequence, simulator.samples_per_keyframe);

    let threaded = bootstrap
        .wait_for_result(Duration::from_secs(10))
        .expect("initialization result");
    assert_eq!(bootstrap.state(), InitState::Initialized);

    let window = sequence
        .alignment_window(&ImuBias::zero(), &ImuParams::default())
        .unwrap();
    let direct = AlignmentEngine::new(config.alignment)
        .unwrap()
        .align(&window, &ImuBias::zero())
        .unwrap();

    assert_eq!(threaded, direct);
    assert_relative_eq!(threaded.gravity, sequence.gravity, epsilon = 1e-3);
}

#[test]
fn keyframes_before_imu_data_are_retried() {
    let simulator = ImuSimulator::new(MotionProfile::stationary());
    let sequence = simulator.generate(5);
    let bootstrap = VioBootstrap::new(BootstrapConfig::default(), ImuBias::zero()).unwrap();

    for keyframe in &sequence.keyframes {
        bootstrap
            .add_keyframe(keyframe.timestamp_ns, keyframe.pose)
            .unwrap();
    }
    thread::sleep(Duration::from_millis(150));
    assert!(bootstrap.try_result().is_none());

    for sample in &sequence.samples {
        bootstrap.add_imu_measurement(*sample).unwrap();
    }

    let result = bootstrap
        .wait_for_result(Duration::from_secs(10))
        .expect("initialization result");
    assert_relative_eq!(result.gravity, Vector3::new(0.0, 0.0, -9.81), epsilon = 1e-3);
    assert!(result.gyro_bias.norm() < 2e-4);
}

#[test]
fn shutdown_stops_waiting_thread() {
    let sequence = ImuSimulator::new(MotionProfile::stationary()).generate(3);
    let mut bootstrap = VioBootstrap::new(BootstrapConfig::default(), ImuBias::zero()).unwrap();

    for keyframe in &sequence.keyframes {
        bootstrap
            .add_keyframe(keyframe.timestamp_ns, keyframe.pose)
            .unwrap();
    }
    bootstrap.shutdown();

    assert!(bootstrap.try_result().is_none());
    assert_ne!(bootstrap.state(), InitState::Initialized);
    assert!(matches!(
        bootstrap.add_keyframe(0, Default::default()),
        Err(InitError::BufferShutdown)
    ));
}

#[test]
fn rejects_out_of_order_imu() {
    let sequence = ImuSimulator::new(MotionProfile::stationary()).generate(2);
    let bootstrap = VioBootstrap::new(BootstrapConfig::default(), ImuBias::zero()).unwrap();

    bootstrap.add_imu_measurement(sequence.samples[5]).unwrap();
    assert!(matches!(
        bootstrap.add_imu_measurement(sequence.samples[3]),
        Err(InitError::NonMonotonicTimestamp { .. })
    ));
    assert_eq!(bootstrap.buffer().stats().rejected, 1);
}

#[test]
fn add_keyframe_gives_up_when_thread_is_busy() {
    let mut config = BootstrapConfig::default();
    // The thread blocks on the second keyframe waiting for IMU data
    config.window.imu_wait_timeout_ms = 5_000;
    let mut bootstrap = VioBootstrap::new(config, ImuBias::zero()).unwrap();

    let start = Instant::now();
    let outcomes: Vec<_> = (0..10u64)
        .map(|k| bootstrap.add_keyframe(1_000_000_000 + k * 100_000_000, Default::default()))
        .collect();
    assert!(start.elapsed() < Duration::from_secs(4));

    let rejected: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
    assert!(!rejected.is_empty());
    for err in rejected {
        assert!(matches!(err, InitError::KeyframeQueueFull { .. }));
        assert!(err.is_transient());
    }

    bootstrap.shutdown();
}
