//! End-to-end streaming through a node and a synchronously stepped engine.

mod common;

use common::{ramp, streaming_model, EchoSession, FRAME, STATE};
use denoise_rt::negotiate::negotiate;
use denoise_rt::{ms_to_samples, DenoiseNode, InferenceWorker, NodeOptions, NodePort};

const RATE: u32 = 48_000;
const MAX_IN_FLIGHT: usize = 4;

fn pipeline(gain: f32) -> (DenoiseNode, NodePort, InferenceWorker) {
    let io = negotiate(&streaming_model()).unwrap();
    assert_eq!(io.frame_size, FRAME);
    assert_eq!(io.state_size, STATE);
    let (worker, link) = InferenceWorker::new(Box::new(EchoSession { gain }), io, 0.0, 32);
    let options = NodeOptions {
        frame_size: FRAME,
        max_in_flight: MAX_IN_FLIGHT,
        sample_rate: RATE,
        ring_capacity: RATE as usize,
    };
    let (node, port) = DenoiseNode::new(options, link.bridge(MAX_IN_FLIGHT));
    (node, port, worker)
}

fn render(node: &mut DenoiseNode, input: &[f32]) -> Vec<f32> {
    let mut out = vec![f32::NAN; input.len()];
    node.process(&[input], &mut [&mut out[..]]);
    out
}

#[test]
fn test_warmup_then_input_reappears_in_order() {
    let (mut node, mut port, mut worker) = pipeline(1.0);
    let warmup_ms = 20;
    assert!(port.enable(warmup_ms));
    let warmup = ms_to_samples(warmup_ms, RATE);
    assert_eq!(warmup, 960);

    let block = 128;
    let mut input = Vec::new();
    let mut output = Vec::new();
    for k in 0..10 {
        let chunk = ramp(k * block, block);
        output.extend(render(&mut node, &chunk));
        input.extend(chunk);
        // The engine finishes everything between two callbacks.
        worker.process_pending();
        assert!(node.outstanding() <= MAX_IN_FLIGHT);
    }

    assert!(output[..warmup].iter().all(|&s| s == 0.0));
    assert_eq!(&output[warmup..], &input[..output.len() - warmup]);
    assert!(warmup <= MAX_IN_FLIGHT * FRAME);

    let stats = port.stats();
    assert_eq!(stats.frames_submitted, 2);
    assert_eq!(stats.frames_applied, 2);
    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.passthrough_frames, 0);
    // Every frame advanced the recurrent state once.
    assert_eq!(worker.model_state().unwrap()[0], 2.0);
}

#[test]
fn test_disable_bypasses_and_stale_frames_never_leak() {
    let (mut node, mut port, mut worker) = pipeline(0.5);
    port.enable(0);

    // Two frames go out, the engine has not answered yet.
    let first = ramp(0, FRAME);
    let second = ramp(FRAME, FRAME);
    assert!(render(&mut node, &first).iter().all(|&s| s == 0.0));
    assert!(render(&mut node, &second).iter().all(|&s| s == 0.0));
    assert_eq!(node.outstanding(), 2);

    port.disable();
    let raw = ramp(2 * FRAME, FRAME);
    assert_eq!(render(&mut node, &raw), raw);

    // Their results arrive, but belong to the session before the re-enable.
    worker.process_pending();
    port.enable(0);
    let third = ramp(3 * FRAME, FRAME);
    assert!(render(&mut node, &third).iter().all(|&s| s == 0.0));
    assert_eq!(port.stats().stale_results, 2);
    assert_eq!(node.outstanding(), 1);

    worker.process_pending();
    let fourth = ramp(4 * FRAME, FRAME);
    let out = render(&mut node, &fourth);
    let expected: Vec<f32> = third.iter().map(|s| s * 0.5).collect();
    assert_eq!(out, expected);
    // The new session started from a zeroed state.
    assert_eq!(worker.model_state().unwrap()[0], 1.0);
}

#[test]
fn test_stalled_engine_drops_oldest_input_and_underruns() {
    let (mut node, mut port, _worker) = pipeline(1.0);
    port.enable(0);
    let block = ramp(0, 4800);
    for _ in 0..20 {
        let out = render(&mut node, &block);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(node.outstanding() <= MAX_IN_FLIGHT);
    }
    let stats = port.stats();
    assert_eq!(stats.frames_submitted, MAX_IN_FLIGHT as u64);
    assert_eq!(stats.underruns, 20);
    // 20 blocks of 4800 into a one-second ring, minus the frames taken out.
    let kept = RATE as u64 + (MAX_IN_FLIGHT * FRAME) as u64;
    assert_eq!(stats.dropped_input_samples, 20 * 4800 - kept);
}

#[test]
fn test_stereo_input_is_downmixed_and_fanned_out() {
    let (mut node, mut port, mut worker) = pipeline(1.0);
    port.enable(0);
    let left = vec![0.25f32; FRAME];
    let right = vec![-0.75f32; FRAME];
    let mut out_l = vec![0.0f32; FRAME];
    let mut out_r = vec![0.0f32; FRAME];
    node.process(&[&left[..], &right[..]], &mut [&mut out_l[..], &mut out_r[..]]);
    worker.process_pending();
    node.process(&[&left[..], &right[..]], &mut [&mut out_l[..], &mut out_r[..]]);
    assert!(out_l.iter().all(|&s| s == -0.25));
    assert_eq!(out_l, out_r);
}

#[test]
fn test_full_engine_queue_keeps_frames_in_order() {
    let io = negotiate(&streaming_model()).unwrap();
    // The job queue holds a single frame, well below the in-flight limit.
    let (mut worker, link) = InferenceWorker::new(Box::new(EchoSession { gain: 1.0 }), io, 0.0, 1);
    let options = NodeOptions {
        frame_size: FRAME,
        max_in_flight: MAX_IN_FLIGHT,
        sample_rate: RATE,
        ring_capacity: RATE as usize,
    };
    let (mut node, mut port) = DenoiseNode::new(options, link.bridge(MAX_IN_FLIGHT));
    port.enable(0);

    let mut input = Vec::new();
    let mut heard = Vec::new();
    for k in 0..8 {
        let chunk = ramp(k * 2 * FRAME, 2 * FRAME);
        let out = render(&mut node, &chunk);
        input.extend(chunk);
        if out.iter().any(|&s| s != 0.0) {
            heard.extend(out);
        }
        worker.process_pending();
    }

    assert!(heard.len() >= 2 * FRAME);
    assert_eq!(&heard[..], &input[..heard.len()]);
    assert_eq!(port.stats().passthrough_frames, 0);
}
