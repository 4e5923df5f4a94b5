//! End-to-end tests for the pipelined combine kernel.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lse_combine::sim::{simulate, SimConfig};
use lse_combine::*;

const EPSILON: f32 = 1e-5;

fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

fn approx_eq(a: f32, b: f32) -> bool {
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn naive_lse(values: &[f32]) -> f32 {
    let sum: f64 = values.iter().map(|&v| (v as f64).exp()).sum();
    if sum == 0.0 {
        f32::NEG_INFINITY
    } else {
        sum.ln() as f32
    }
}

fn run(data: &[f32], num_chunks: usize, config: LseConfig) -> (Vec<f32>, KernelStats) {
    let input = LseInput::new(data, num_chunks, config.rows).unwrap();
    let mut output = LseOutput::new(config.rows);
    let stats = combine_lse(&input, &mut output, &config).unwrap();
    assert!(output.is_complete(), "every row must be written exactly once");
    (output.into_vec(), stats)
}

fn pseudo_random(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            if rng.gen_bool(1.0 / 13.0) {
                f32::NEG_INFINITY
            } else {
                rng.gen_range(-10.0f32..10.0)
            }
        })
        .collect()
}

#[test]
fn test_matches_naive_across_geometries() {
    init_logger();

    for &(rows, num_chunks) in &[(1, 1), (7, 3), (16, 9), (33, 2), (64, 17)] {
        for reduce_groups in 1..=4 {
            for stages in 1..=3 {
                let config = LseConfig::new(rows)
                    .with_reduce_groups(reduce_groups)
                    .with_lanes_per_group(2)
                    .with_stages(stages);
                let data = pseudo_random(rows * num_chunks, (rows * 31 + num_chunks) as u64);
                let (values, stats) = run(&data, num_chunks, config);

                for (row, value) in values.iter().enumerate() {
                    let column: Vec<f32> =
                        (0..num_chunks).map(|c| data[c * rows + row]).collect();
                    let expected = naive_lse(&column);
                    assert!(
                        approx_eq(*value, expected),
                        "row {} of {}x{} ({} groups, {} stages): {} vs {}",
                        row,
                        num_chunks,
                        rows,
                        reduce_groups,
                        stages,
                        value,
                        expected
                    );
                }
                assert_eq!(stats.loads_issued, num_chunks);
                assert!(stats.peak_in_flight <= stages);
                assert_eq!(stats.rows_emitted, rows);
            }
        }
    }
}

#[test]
fn test_matches_serial_reference_exactly() {
    let (rows, num_chunks) = (40, 25);
    let data = pseudo_random(rows * num_chunks, 99);
    let input = LseInput::new(&data, num_chunks, rows).unwrap();
    let (values, _) = run(&data, num_chunks, LseConfig::new(rows));
    assert_eq!(values, lse_reference(&input));
}

#[test]
fn test_empty_input_is_neg_inf() {
    let (values, stats) = run(&[], 0, LseConfig::new(9));
    assert_eq!(values, vec![f32::NEG_INFINITY; 9]);
    assert_eq!(stats.loads_issued, 0);
    assert_eq!(stats.peak_in_flight, 0);
}

#[test]
fn test_single_chunk_returns_input() {
    let data = pseudo_random(12, 5);
    let (values, _) = run(&data, 1, LseConfig::new(12));
    assert_eq!(values, data);
}

#[test]
fn test_all_sentinel_rows() {
    let rows = 6;
    let mut data = pseudo_random(rows * 4, 17);
    for chunk in 0..4 {
        data[chunk * rows + 2] = f32::NEG_INFINITY;
        data[chunk * rows + 5] = f32::NEG_INFINITY;
    }
    let (values, _) = run(&data, 4, LseConfig::new(rows));
    assert_eq!(values[2], f32::NEG_INFINITY);
    assert_eq!(values[5], f32::NEG_INFINITY);
}

#[test]
fn test_overflow_resistance() {
    let (values, _) = run(&[1e30, 1e30], 2, LseConfig::new(1));
    assert!(values[0].is_finite());
    assert!(approx_eq(values[0], 1e30 + std::f32::consts::LN_2));

    let (values, _) = run(&[88.0, 89.0, 90.0], 3, LseConfig::new(1));
    assert!(values[0].is_finite());
    assert!(approx_eq(values[0], naive_lse(&[88.0, 89.0, 90.0])));
}

#[test]
fn test_row_coverage() {
    for rows in [0, 1, 3, 12, 50] {
        for reduce_groups in 1..=5 {
            let config = LseConfig::new(rows)
                .with_reduce_groups(reduce_groups)
                .with_lanes_per_group(3);
            let data = vec![0.0f32; rows * 2];
            let input = LseInput::new(&data, 2, rows).unwrap();
            let mut output = LseOutput::new(rows);
            let stats = combine_lse(&input, &mut output, &config).unwrap();

            assert!(output.write_counts().iter().all(|&w| w == 1));
            assert_eq!(stats.rows_emitted, rows);
        }
    }
}

#[test]
fn test_long_stream_through_small_ring() {
    let (rows, num_chunks) = (8, 200);
    let data = pseudo_random(rows * num_chunks, 3);
    let config = LseConfig::new(rows).with_stages(2).with_lanes_per_group(1);
    let (values, stats) = run(&data, num_chunks, config);

    let input = LseInput::new(&data, num_chunks, rows).unwrap();
    assert_eq!(values, lse_reference(&input));
    assert_eq!(stats.chunks_folded, vec![num_chunks; 3]);
    assert!(stats.peak_in_flight <= 2);
}

#[test]
fn test_invalid_config_is_rejected() {
    let data = vec![0.0f32; 4];
    let input = LseInput::new(&data, 1, 4).unwrap();
    let mut output = LseOutput::new(4);
    let config = LseConfig::new(4).with_reduce_groups(0);
    assert!(matches!(
        combine_lse(&input, &mut output, &config),
        Err(LseError::InvalidConfig(_))
    ));
    assert_eq!(output.write_counts(), &[0, 0, 0, 0]);
}

#[test]
fn test_simulated_pipeline_is_safe() {
    for stages in 1..=3 {
        for reduce_groups in 1..=4 {
            for num_chunks in 0..12 {
                for seed in 0..4 {
                    let report =
                        simulate(SimConfig::new(num_chunks, stages, reduce_groups), seed).unwrap();
                    assert!(report.peak_in_flight <= stages);
                }
            }
        }
    }
}

/// Transfer engine that stalls before every load, so the reducers really
/// block on the arrival counter.
struct DelayedEngine;

impl TransferEngine for DelayedEngine {
    fn async_load(
        &self,
        dst: &mut [f32],
        source: &LseInput<'_>,
        coord: TileCoord,
        arrival: &lse_combine::sync::PhaseCounter,
        padding: f32,
    ) {
        thread::sleep(Duration::from_micros(200));
        HostTransferEngine.async_load(dst, source, coord, arrival, padding);
    }
}

#[test]
fn test_slow_transfer_engine() {
    let (rows, num_chunks) = (10, 12);
    let data = pseudo_random(rows * num_chunks, 41);
    let input = LseInput::new(&data, num_chunks, rows).unwrap();
    let mut output = LseOutput::new(rows);
    let config = LseConfig::new(rows).with_reduce_groups(2);

    let stats = combine_lse_with(&DelayedEngine, &input, &mut output, &config).unwrap();

    assert_eq!(output.as_slice(), lse_reference(&input).as_slice());
    assert_eq!(stats.loads_issued, num_chunks);
}

/// Transfer engine whose copy dies on one chunk.
struct PanickingEngine {
    at: usize,
}

impl TransferEngine for PanickingEngine {
    fn async_load(
        &self,
        dst: &mut [f32],
        source: &LseInput<'_>,
        coord: TileCoord,
        arrival: &lse_combine::sync::PhaseCounter,
        padding: f32,
    ) {
        if coord.chunk == self.at {
            panic!("copy engine fault on chunk {}", coord.chunk);
        }
        HostTransferEngine.async_load(dst, source, coord, arrival, padding);
    }
}

#[test]
fn test_engine_panic_is_reported() {
    init_logger();

    for at in [0, 3, 7] {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (rows, num_chunks) = (9, 8);
            let data = pseudo_random(rows * num_chunks, 5);
            let input = LseInput::new(&data, num_chunks, rows).unwrap();
            let mut output = LseOutput::new(rows);
            let config = LseConfig::new(rows).with_lanes_per_group(2);
            let _ = tx.send(combine_lse_with(
                &PanickingEngine { at },
                &input,
                &mut output,
                &config,
            ));
        });

        let result = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("combine must return after an engine panic");
        assert!(
            matches!(result, Err(LseError::WorkerPanicked(ref who)) if who == "transfer"),
            "chunk {}: {:?}",
            at,
            result
        );
    }
}
